//! Vaccination records.

use super::{Entity, NestContext, Repository};
use crate::error::Result;
use crate::events::Topic;
use crate::types::{RecordId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// One administered vaccine. Dates are ISO `YYYY-MM-DD` strings, which
/// order correctly as plain strings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Vaccine {
    pub id: RecordId,
    pub pet_id: RecordId,
    pub name: String,
    pub date: String,
    pub next_dose_date: Option<String>,
    pub clinic: String,
    pub notes: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity for Vaccine {
    const TOPIC: Topic = Topic::Vaccines;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn blank(id: RecordId, now: Timestamp, _actor: &UserId) -> Self {
        Vaccine {
            id,
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

pub struct Vaccines {
    repo: Repository<Vaccine>,
}

impl Vaccines {
    pub fn new(ctx: NestContext) -> Self {
        Self {
            repo: Repository::new(ctx),
        }
    }

    /// A pet's vaccines, most recent first.
    pub fn for_pet(&self, pet_id: &RecordId) -> Vec<Vaccine> {
        let mut list: Vec<_> = self
            .repo
            .load_all()
            .into_iter()
            .filter(|v| &v.pet_id == pet_id)
            .collect();
        list.sort_by(|a, b| b.date.cmp(&a.date));
        list
    }

    /// Vaccines whose next dose falls on or before `date`, soonest first.
    pub fn due_before(&self, date: &str) -> Vec<Vaccine> {
        let mut due: Vec<_> = self
            .repo
            .load_all()
            .into_iter()
            .filter(|v| matches!(&v.next_dose_date, Some(next) if !next.is_empty() && next.as_str() <= date))
            .collect();
        due.sort_by(|a, b| a.next_dose_date.cmp(&b.next_dose_date));
        due
    }

    /// Delete every vaccine of a pet. Returns how many went.
    pub fn remove_for_pet(&self, pet_id: &RecordId) -> Result<usize> {
        self.repo.remove_where(|v| &v.pet_id == pet_id)
    }
}

impl Deref for Vaccines {
    type Target = Repository<Vaccine>;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::test_support::context;
    use serde_json::json;

    fn seed(vaccines: &Vaccines) {
        vaccines
            .add(json!({"petId": "rex", "name": "Rabies", "date": "2024-01-10", "nextDoseDate": "2025-01-10"}))
            .unwrap();
        vaccines
            .add(json!({"petId": "rex", "name": "Parvo", "date": "2024-06-01", "nextDoseDate": "2024-12-01"}))
            .unwrap();
        vaccines
            .add(json!({"petId": "mia", "name": "FVRCP", "date": "2024-03-03"}))
            .unwrap();
    }

    #[test]
    fn test_for_pet_sorted_recent_first() {
        let vaccines = Vaccines::new(context());
        seed(&vaccines);

        let names: Vec<_> = vaccines
            .for_pet(&RecordId::from("rex"))
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["Parvo", "Rabies"]);
    }

    #[test]
    fn test_due_before() {
        let vaccines = Vaccines::new(context());
        seed(&vaccines);

        let due: Vec<_> = vaccines.due_before("2025-01-10").into_iter().map(|v| v.name).collect();
        assert_eq!(due, vec!["Parvo", "Rabies"]);

        let due = vaccines.due_before("2024-12-31");
        assert_eq!(due.len(), 1);
        assert!(vaccines.due_before("2024-01-01").is_empty());
    }

    #[test]
    fn test_numeric_pet_id_from_form() {
        let vaccines = Vaccines::new(context());
        vaccines.add(json!({"petId": 42, "name": "Rabies"})).unwrap();
        assert_eq!(vaccines.for_pet(&RecordId::from(42u64)).len(), 1);
    }

    #[test]
    fn test_remove_for_pet() {
        let vaccines = Vaccines::new(context());
        seed(&vaccines);

        assert_eq!(vaccines.remove_for_pet(&RecordId::from("rex")).unwrap(), 2);
        assert_eq!(vaccines.count(), 1);
    }
}
