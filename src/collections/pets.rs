//! Pet profiles.

use super::{Entity, NestContext, Repository};
use crate::error::Result;
use crate::events::Topic;
use crate::types::{lenient, RecordId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// A pet profile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Pet {
    pub id: RecordId,
    pub owner_id: UserId,
    pub name: String,
    pub species: String,
    pub breed: String,
    pub gender: String,
    pub size: String,
    /// Kilograms.
    #[serde(deserialize_with = "lenient::optional_f64")]
    pub weight: Option<f64>,
    /// ISO date.
    pub birthdate: Option<String>,
    /// Data URI.
    pub avatar: Option<String>,
    /// Photo ids, newest first.
    pub gallery: Vec<RecordId>,
    pub vaccines: Vec<RecordId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity for Pet {
    const TOPIC: Topic = Topic::Pets;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn blank(id: RecordId, now: Timestamp, actor: &UserId) -> Self {
        Pet {
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

/// Display fields other collections show for a pet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetSummary {
    pub id: RecordId,
    pub name: String,
    pub avatar: Option<String>,
}

impl From<&Pet> for PetSummary {
    fn from(pet: &Pet) -> Self {
        PetSummary {
            id: pet.id.clone(),
            name: pet.name.clone(),
            avatar: pet.avatar.clone(),
        }
    }
}

/// Pet repository with gallery and vaccine links.
pub struct Pets {
    repo: Repository<Pet>,
}

impl Pets {
    pub fn new(ctx: NestContext) -> Self {
        Self {
            repo: Repository::new(ctx),
        }
    }

    /// Link a photo into the pet's gallery (newest first, no duplicates).
    pub fn add_photo_to_gallery(&self, pet_id: &RecordId, photo_id: &RecordId) -> Result<Option<Pet>> {
        self.repo.modify(pet_id, |pet| {
            if !pet.gallery.contains(photo_id) {
                pet.gallery.insert(0, photo_id.clone());
            }
        })
    }

    pub fn remove_photo_from_gallery(
        &self,
        pet_id: &RecordId,
        photo_id: &RecordId,
    ) -> Result<Option<Pet>> {
        self.repo
            .modify(pet_id, |pet| pet.gallery.retain(|id| id != photo_id))
    }

    pub fn attach_vaccine(&self, pet_id: &RecordId, vaccine_id: &RecordId) -> Result<Option<Pet>> {
        self.repo.modify(pet_id, |pet| {
            if !pet.vaccines.contains(vaccine_id) {
                pet.vaccines.push(vaccine_id.clone());
            }
        })
    }

    pub fn detach_vaccine(&self, pet_id: &RecordId, vaccine_id: &RecordId) -> Result<Option<Pet>> {
        self.repo
            .modify(pet_id, |pet| pet.vaccines.retain(|id| id != vaccine_id))
    }

    /// Pets of a species, case-insensitive.
    pub fn by_species(&self, species: &str) -> Vec<Pet> {
        self.repo
            .load_all()
            .into_iter()
            .filter(|pet| pet.species.eq_ignore_ascii_case(species))
            .collect()
    }

    pub fn owned_by(&self, owner: &UserId) -> Vec<Pet> {
        self.repo
            .load_all()
            .into_iter()
            .filter(|pet| &pet.owner_id == owner)
            .collect()
    }

    pub fn summaries(&self) -> Vec<PetSummary> {
        self.repo.load_all().iter().map(PetSummary::from).collect()
    }
}

impl Deref for Pets {
    type Target = Repository<Pet>;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}
