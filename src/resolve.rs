//! Resolving weak references between collections.
//!
//! Feed posts and galleries store photo and pet ids, never the records
//! themselves. Lookups happen at read time and a dangling id resolves to
//! [`Resolved::Missing`] instead of failing.

use crate::collections::feed::{Feed, FeedPost, PostKind};
use crate::collections::pets::{Pet, PetSummary, Pets};
use crate::collections::photos::{Photo, Photos};
use crate::collections::Entity;
use crate::types::RecordId;
use serde::Serialize;
use std::collections::HashMap;

/// Outcome of following a weak reference.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Resolved<T> {
    Found(T),
    /// The referenced record no longer exists.
    Missing(RecordId),
}

impl<T> Resolved<T> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Resolved::Missing(_))
    }

    pub fn found(&self) -> Option<&T> {
        match self {
            Resolved::Found(value) => Some(value),
            Resolved::Missing(_) => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Resolved::Found(value) => Some(value),
            Resolved::Missing(_) => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Resolved<U> {
        match self {
            Resolved::Found(value) => Resolved::Found(f(value)),
            Resolved::Missing(id) => Resolved::Missing(id),
        }
    }

    /// Value to display, with `placeholder` standing in for a missing record.
    pub fn unwrap_or(self, placeholder: T) -> T {
        self.into_option().unwrap_or(placeholder)
    }
}

/// Id-keyed view over a loaded collection.
pub struct Lookup<'a, T> {
    by_id: HashMap<&'a RecordId, &'a T>,
}

impl<'a, T: Entity> Lookup<'a, T> {
    pub fn new(records: &'a [T]) -> Self {
        let mut by_id = HashMap::with_capacity(records.len());
        for record in records {
            // Keep the first (newest) record when ids collide.
            by_id.entry(record.id()).or_insert(record);
        }
        Self { by_id }
    }

    pub fn resolve(&self, id: &RecordId) -> Resolved<&'a T> {
        match self.by_id.get(id) {
            Some(record) => Resolved::Found(*record),
            None => Resolved::Missing(id.clone()),
        }
    }
}

/// Image source of a photo by id.
pub fn resolve_photo_src(photos: &[Photo], id: &RecordId) -> Resolved<String> {
    match photos.iter().find(|p| &p.id == id) {
        Some(photo) => Resolved::Found(photo.src.clone()),
        None => Resolved::Missing(id.clone()),
    }
}

/// Display summaries for a list of pet ids, in the same order.
pub fn resolve_pets(pets: &[Pet], ids: &[RecordId]) -> Vec<Resolved<PetSummary>> {
    let lookup = Lookup::new(pets);
    ids.iter()
        .map(|id| lookup.resolve(id).map(PetSummary::from))
        .collect()
}

/// A feed post joined with the records it points at.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderedPost {
    pub post: FeedPost,
    /// Photo posts only.
    pub image: Option<Resolved<String>>,
    pub pets: Vec<Resolved<PetSummary>>,
}

/// Read-side join of the feed with photos and pets.
pub struct FeedView<'a> {
    feed: &'a Feed,
    photos: &'a Photos,
    pets: &'a Pets,
}

impl<'a> FeedView<'a> {
    pub fn new(feed: &'a Feed, photos: &'a Photos, pets: &'a Pets) -> Self {
        Self { feed, photos, pets }
    }

    /// Every post, newest first, with references resolved. Each collection
    /// is read once per render.
    pub fn render(&self) -> Vec<RenderedPost> {
        let posts = self.feed.load_all();
        let photos = self.photos.load_all();
        let pets = self.pets.load_all();

        let photo_lookup = Lookup::new(&photos);
        let pet_lookup = Lookup::new(&pets);

        posts
            .into_iter()
            .map(|post| {
                let image = match (&post.kind, &post.photo_id) {
                    (PostKind::Photo, Some(id)) => {
                        Some(photo_lookup.resolve(id).map(|photo| photo.src.clone()))
                    }
                    (PostKind::Photo, None) => Some(Resolved::Missing(RecordId::default())),
                    (PostKind::Text, _) => None,
                };
                let pets = post
                    .pet_ids
                    .iter()
                    .map(|id| pet_lookup.resolve(id).map(PetSummary::from))
                    .collect();
                RenderedPost { post, image, pets }
            })
            .collect()
    }
}
