//! The top-level handle.

use crate::backup::{Backup, ImportReport};
use crate::collections::family::FamilyStore;
use crate::collections::feed::Feed;
use crate::collections::pets::Pets;
use crate::collections::photos::{Photo, Photos};
use crate::collections::settings::SettingsStore;
use crate::collections::social::{FollowGraph, Users};
use crate::collections::vaccines::{Vaccine, Vaccines};
use crate::collections::NestContext;
use crate::config::{Backend, NestConfig};
use crate::error::{Result, StoreError};
use crate::events::EventBus;
use crate::identity::IdentityProvider;
use crate::kv::{FileStore, KeyValueStore, MemoryStore};
use crate::resolve::FeedView;
use crate::types::{RecordId, StorageUsage};
use serde_json::{json, Value};
use std::sync::Arc;

/// Summary of a cascading pet deletion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PetRemoval {
    pub removed: bool,
    pub vaccines_removed: usize,
    pub photos_untagged: usize,
}

/// Owns the store, the event bus and every collection.
pub struct PetNest {
    ctx: NestContext,
    pets: Pets,
    photos: Photos,
    feed: Feed,
    vaccines: Vaccines,
    family: FamilyStore,
    users: Users,
    follows: FollowGraph,
    settings: SettingsStore,
}

impl PetNest {
    /// Open the configured backend, creating it if allowed.
    pub fn open_or_create(config: NestConfig, identity: Arc<dyn IdentityProvider>) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match config.backend {
            Backend::Memory => Arc::new(MemoryStore::with_quota(config.quota_bytes)),
            Backend::File if config.create_if_missing => {
                Arc::new(FileStore::open_or_create(&config.path, config.quota_bytes)?)
            }
            Backend::File => Arc::new(FileStore::open(&config.path, config.quota_bytes)?),
        };
        tracing::debug!(backend = ?config.backend, quota = config.quota_bytes, "opened nest");
        Ok(Self::with_store(
            store,
            EventBus::with_buffer_size(config.event_buffer_size),
            identity,
        ))
    }

    /// A nest backed by a fresh in-memory store with the default quota.
    pub fn in_memory(identity: Arc<dyn IdentityProvider>) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), EventBus::new(), identity)
    }

    /// A nest over any backend.
    pub fn with_store(
        store: Arc<dyn KeyValueStore>,
        bus: EventBus,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let ctx = NestContext::new(store, bus, identity);
        Self {
            pets: Pets::new(ctx.clone()),
            photos: Photos::new(ctx.clone()),
            feed: Feed::new(ctx.clone()),
            vaccines: Vaccines::new(ctx.clone()),
            family: FamilyStore::new(ctx.clone()),
            users: Users::new(ctx.clone()),
            follows: FollowGraph::new(ctx.clone()),
            settings: SettingsStore::new(ctx.clone()),
            ctx,
        }
    }

    pub fn pets(&self) -> &Pets {
        &self.pets
    }

    pub fn photos(&self) -> &Photos {
        &self.photos
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn vaccines(&self) -> &Vaccines {
        &self.vaccines
    }

    pub fn family(&self) -> &FamilyStore {
        &self.family
    }

    pub fn users(&self) -> &Users {
        &self.users
    }

    pub fn follows(&self) -> &FollowGraph {
        &self.follows
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn context(&self) -> &NestContext {
        &self.ctx
    }

    pub fn usage(&self) -> StorageUsage {
        self.ctx.store.usage()
    }

    /// Feed joined with photos and pets.
    pub fn feed_view(&self) -> FeedView<'_> {
        FeedView::new(&self.feed, &self.photos, &self.pets)
    }

    /// Upload a photo and link it into the gallery of every tagged pet.
    pub fn upload_photo(
        &self,
        src: impl Into<String>,
        caption: impl Into<String>,
        pet_ids: Vec<RecordId>,
    ) -> Result<Photo> {
        let photo = self.photos.upload(src, caption, pet_ids)?;
        for pet_id in &photo.pet_ids {
            if self.pets.add_photo_to_gallery(pet_id, &photo.id)?.is_none() {
                tracing::debug!(pet = %pet_id, photo = %photo.id, "tagged pet does not exist");
            }
        }
        Ok(photo)
    }

    /// Delete a photo and unlink it from galleries. Posts pointing at it
    /// keep their id and render as missing.
    pub fn delete_photo(&self, photo_id: &RecordId) -> Result<bool> {
        let Some(photo) = self.photos.get_by_id(photo_id) else {
            return Ok(false);
        };
        for pet_id in &photo.pet_ids {
            self.pets.remove_photo_from_gallery(pet_id, photo_id)?;
        }
        self.photos.remove(photo_id)
    }

    /// Record a vaccine for an existing pet and link it from the pet.
    pub fn record_vaccine(&self, pet_id: &RecordId, fields: Value) -> Result<Vaccine> {
        if self.pets.get_by_id(pet_id).is_none() {
            return Err(StoreError::InvalidOperation(format!("no pet {}", pet_id)));
        }
        let mut fields = match fields {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            other => {
                return Err(StoreError::InvalidOperation(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };
        fields.insert("petId".into(), json!(pet_id));

        let vaccine = self.vaccines.add(Value::Object(fields))?;
        self.pets.attach_vaccine(pet_id, &vaccine.id)?;
        Ok(vaccine)
    }

    /// Delete a pet along with its vaccines and photo tags.
    pub fn delete_pet(&self, pet_id: &RecordId) -> Result<PetRemoval> {
        let removed = self.pets.remove(pet_id)?;
        let vaccines_removed = self.vaccines.remove_for_pet(pet_id)?;
        let photos_untagged = self.photos.untag_pet(pet_id)?;
        tracing::debug!(pet = %pet_id, removed, vaccines_removed, photos_untagged, "deleted pet");
        Ok(PetRemoval {
            removed,
            vaccines_removed,
            photos_untagged,
        })
    }

    pub fn export(&self) -> Result<Backup> {
        Backup::export(&self.ctx)
    }

    pub fn export_json(&self) -> Result<String> {
        self.export()?.to_json()
    }

    pub fn import(&self, backup: &Backup) -> Result<ImportReport> {
        backup.import(&self.ctx)
    }

    pub fn import_json(&self, raw: &str) -> Result<ImportReport> {
        Backup::from_json(raw)?.import(&self.ctx)
    }
}
