//! Photo uploads.

use super::{Entity, NestContext, Repository};
use crate::error::{Result, StoreError};
use crate::events::Topic;
use crate::types::{RecordId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// An uploaded photo. `src` carries the encoded image itself, which is why
/// other records only ever reference photos by id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Photo {
    pub id: RecordId,
    pub owner_id: UserId,
    pub pet_ids: Vec<RecordId>,
    pub caption: String,
    /// Data URI.
    pub src: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity for Photo {
    const TOPIC: Topic = Topic::Photos;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn blank(id: RecordId, now: Timestamp, actor: &UserId) -> Self {
        Photo {
            id,
            owner_id: actor.clone(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    fn stamp(&mut self, id: RecordId, now: Timestamp) {
        self.id = id;
        self.created_at = now;
        self.updated_at = now;
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }
}

pub struct Photos {
    repo: Repository<Photo>,
}

impl Photos {
    pub fn new(ctx: NestContext) -> Self {
        Self {
            repo: Repository::new(ctx),
        }
    }

    /// Store a new photo tagged with zero or more pets.
    ///
    /// When storage is full the oldest photos are dropped to make room;
    /// the new photo itself is kept unless it alone exceeds the quota.
    pub fn upload(
        &self,
        src: impl Into<String>,
        caption: impl Into<String>,
        pet_ids: Vec<RecordId>,
    ) -> Result<Photo> {
        let src = src.into();
        if src.is_empty() {
            return Err(StoreError::InvalidOperation("photo has no image data".into()));
        }

        let owner_id = self.repo.context().identity.current_user();
        self.repo.insert(Photo {
            owner_id,
            pet_ids,
            caption: caption.into(),
            src,
            ..Default::default()
        })
    }

    pub fn set_caption(&self, id: &RecordId, caption: impl Into<String>) -> Result<Option<Photo>> {
        let caption = caption.into();
        self.repo.modify(id, |photo| photo.caption = caption)
    }

    /// Photos tagged with `pet_id`, newest first.
    pub fn for_pet(&self, pet_id: &RecordId) -> Vec<Photo> {
        self.repo
            .load_all()
            .into_iter()
            .filter(|photo| photo.pet_ids.contains(pet_id))
            .collect()
    }

    /// Remove a pet tag from every photo. Returns how many photos changed.
    pub fn untag_pet(&self, pet_id: &RecordId) -> Result<usize> {
        let mut photos = self.repo.load_all();
        let mut changed = 0;
        for photo in photos.iter_mut() {
            let before = photo.pet_ids.len();
            photo.pet_ids.retain(|id| id != pet_id);
            if photo.pet_ids.len() != before {
                photo.touch(Timestamp::now());
                changed += 1;
            }
        }
        if changed > 0 {
            self.repo.save_all(photos)?;
        }
        Ok(changed)
    }
}

impl Deref for Photos {
    type Target = Repository<Photo>;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::test_support::{context, context_with_store};
    use crate::kv::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_upload_and_caption() {
        let photos = Photos::new(context());
        let photo = photos
            .upload("data:image/png;base64,AAAA", "Walk", vec![RecordId::from("pet1")])
            .unwrap();
        assert_eq!(photo.caption, "Walk");
        assert_eq!(photo.owner_id, UserId::from("alice"));

        let photo = photos.set_caption(&photo.id, "Long walk").unwrap().unwrap();
        assert_eq!(photos.get_by_id(&photo.id).unwrap().caption, "Long walk");
    }

    #[test]
    fn test_upload_requires_image() {
        let photos = Photos::new(context());
        assert!(photos.upload("", "empty", vec![]).is_err());
        assert!(photos.load_all().is_empty());
    }

    #[test]
    fn test_for_pet_and_untag() {
        let photos = Photos::new(context());
        let rex = RecordId::from("rex");
        let mia = RecordId::from("mia");
        photos.upload("data:a", "both", vec![rex.clone(), mia.clone()]).unwrap();
        photos.upload("data:b", "rex only", vec![rex.clone()]).unwrap();
        photos.upload("data:c", "nobody", vec![]).unwrap();

        assert_eq!(photos.for_pet(&rex).len(), 2);
        assert_eq!(photos.for_pet(&mia).len(), 1);

        assert_eq!(photos.untag_pet(&rex).unwrap(), 2);
        assert!(photos.for_pet(&rex).is_empty());
        assert_eq!(photos.count(), 3);
    }

    #[test]
    fn test_full_storage_drops_oldest_photos() {
        let image = format!("data:image/jpeg;base64,{}", "A".repeat(1000));
        // Room for roughly three photos.
        let store = Arc::new(MemoryStore::with_quota(3 * 1200));
        let photos = Photos::new(context_with_store(store));

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(photos.upload(image.clone(), format!("#{}", i), vec![]).unwrap().id);
        }

        let kept: Vec<_> = photos.load_all().into_iter().map(|p| p.id).collect();
        assert!(kept.len() < 5);
        // Newest upload always survives; oldest are the ones missing.
        assert_eq!(kept[0], ids[4]);
        assert!(!kept.contains(&ids[0]));
    }
}
