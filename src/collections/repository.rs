//! Array collections and id-addressed repositories.

use super::{shallow_merge, NestContext};
use crate::error::{Result, StoreError};
use crate::events::{Change, ChangeEvent, Topic};
use crate::quota::{save_safely, SaveOutcome};
use crate::types::{RecordId, Timestamp, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;

/// Fields callers may not overwrite through a JSON patch.
const PROTECTED_ON_UPDATE: &[&str] = &["id", "createdAt"];

/// Fields `add` always assigns itself.
const PROTECTED_ON_ADD: &[&str] = &["id", "createdAt", "updatedAt"];

/// A record type stored in a [`Repository`].
///
/// Records serialize with camelCase field names, the layout the web client
/// persisted, so existing storage and backups load unchanged.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Collection this entity lives in.
    const TOPIC: Topic;

    fn id(&self) -> &RecordId;

    /// Schema default for a freshly created record.
    fn blank(id: RecordId, now: Timestamp, actor: &UserId) -> Self;

    /// Assign identity and creation time to a record built by the caller.
    fn stamp(&mut self, id: RecordId, now: Timestamp);

    /// Record a modification.
    fn touch(&mut self, now: Timestamp);
}

/// A JSON array persisted under one storage key, newest entry first.
pub struct Collection<T> {
    ctx: NestContext,
    topic: Topic,
    /// Complete default entry, used to salvage entries with bad fields.
    template: Map<String, Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Collection<T> {
    pub fn new(ctx: NestContext, topic: Topic) -> Self {
        Self::with_template(ctx, topic, Map::new())
    }

    fn with_template(ctx: NestContext, topic: Topic, template: Map<String, Value>) -> Self {
        Self {
            ctx,
            topic,
            template,
            _marker: PhantomData,
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn key(&self) -> &'static str {
        self.topic.storage_key()
    }

    pub fn context(&self) -> &NestContext {
        &self.ctx
    }

    /// Every stored entry. Missing or corrupt data yields an empty list.
    ///
    /// Entries decode one at a time: a field of the wrong type falls back to
    /// its default, and only an entry that cannot be read at all is skipped.
    pub fn load_all(&self) -> Vec<T> {
        let raw = match self.ctx.store.get(self.key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(key = self.key(), error = %e, "read failed, using empty collection");
                return Vec::new();
            }
        };

        let entries: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(key = self.key(), error = %e, "corrupt collection, using empty list");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| self.decode_entry(index, entry))
            .collect()
    }

    fn decode_entry(&self, index: usize, entry: Value) -> Option<T> {
        let error = match T::deserialize(&entry) {
            Ok(item) => return Some(item),
            Err(e) => e,
        };

        if let Value::Object(fields) = entry {
            let mut kept = Map::new();
            let mut dropped = Vec::new();
            for (name, field) in fields {
                let mut candidate = self.template.clone();
                candidate.insert(name.clone(), field.clone());
                if T::deserialize(&Value::Object(candidate)).is_ok() {
                    kept.insert(name, field);
                } else {
                    dropped.push(name);
                }
            }

            let mut salvaged = self.template.clone();
            salvaged.extend(kept);
            if let Ok(item) = T::deserialize(&Value::Object(salvaged)) {
                tracing::warn!(key = self.key(), index, fields = ?dropped, %error, "reset malformed fields");
                return Some(item);
            }
        }

        tracing::warn!(key = self.key(), index, %error, "skipping unreadable entry");
        None
    }

    /// Persist `items` (trimming oldest on quota errors) and announce `change`.
    pub fn save_all(&self, items: &mut Vec<T>, change: Change) -> Result<SaveOutcome> {
        let outcome = self.persist(items)?;
        self.announce(change, outcome.trimmed);
        Ok(outcome)
    }

    fn persist(&self, items: &mut Vec<T>) -> Result<SaveOutcome> {
        save_safely(self.ctx.store.as_ref(), self.key(), items)
    }

    fn announce(&self, change: Change, trimmed: usize) {
        self.ctx
            .bus
            .publish(ChangeEvent::new(self.topic, change).with_trimmed(trimmed));
    }
}

/// Id-addressed operations over a collection of [`Entity`] records.
pub struct Repository<T: Entity> {
    collection: Collection<T>,
}

impl<T: Entity> Repository<T> {
    pub fn new(ctx: NestContext) -> Self {
        let blank = T::blank(RecordId::default(), Timestamp::default(), &UserId::default());
        let template = match serde_json::to_value(blank) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            collection: Collection::with_template(ctx, T::TOPIC, template),
        }
    }

    pub fn context(&self) -> &NestContext {
        self.collection.context()
    }

    /// Every record, newest first.
    pub fn load_all(&self) -> Vec<T> {
        self.collection.load_all()
    }

    /// Replace the whole collection.
    pub fn save_all(&self, mut records: Vec<T>) -> Result<SaveOutcome> {
        self.collection.save_all(&mut records, Change::Replaced)
    }

    pub fn get_by_id(&self, id: &RecordId) -> Option<T> {
        self.load_all().into_iter().find(|r| r.id() == id)
    }

    pub fn count(&self) -> usize {
        self.load_all().len()
    }

    /// Create a record from caller-supplied fields merged over the schema
    /// default. The id and timestamps are always generated.
    pub fn add(&self, partial: Value) -> Result<T> {
        let patch = into_object(partial)?;
        let ctx = self.context();
        let blank = T::blank(ctx.ids.next_id(), Timestamp::now(), &ctx.identity.current_user());

        let mut merged = match serde_json::to_value(&blank)? {
            Value::Object(map) => map,
            _ => return Err(StoreError::InvalidOperation("entity is not an object".into())),
        };
        shallow_merge(&mut merged, patch, PROTECTED_ON_ADD);
        let record: T = self.decode(Value::Object(merged))?;

        self.push_front(record)
    }

    /// Store a caller-built record under a fresh id.
    pub fn insert(&self, mut record: T) -> Result<T> {
        record.stamp(self.context().ids.next_id(), Timestamp::now());
        self.push_front(record)
    }

    /// Store `record` under its own id, replacing any record with that id.
    pub fn upsert(&self, mut record: T) -> Result<T> {
        let mut records = self.load_all();
        let now = Timestamp::now();
        match records.iter().position(|r| r.id() == record.id()) {
            Some(index) => {
                record.touch(now);
                records[index] = record.clone();
                let id = record.id().clone();
                self.save_edited(&mut records, index, &id)?;
                Ok(record)
            }
            None => {
                let id = record.id().clone();
                record.stamp(id, now);
                self.push_front(record)
            }
        }
    }

    /// Shallow-merge `patch` into the record with `id`.
    ///
    /// Returns `Ok(None)` when no such record exists.
    pub fn update(&self, id: &RecordId, patch: Value) -> Result<Option<T>> {
        let patch = into_object(patch)?;
        let mut records = self.load_all();
        let Some(index) = records.iter().position(|r| r.id() == id) else {
            return Ok(None);
        };

        let mut merged = match serde_json::to_value(&records[index])? {
            Value::Object(map) => map,
            _ => return Err(StoreError::InvalidOperation("entity is not an object".into())),
        };
        shallow_merge(&mut merged, patch, PROTECTED_ON_UPDATE);
        let mut record: T = self.decode(Value::Object(merged))?;
        record.touch(Timestamp::now());

        records[index] = record.clone();
        if !self.save_edited(&mut records, index, id)? {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Apply a typed change to the record with `id`.
    ///
    /// Returns `Ok(None)` when no such record exists.
    pub fn modify<F>(&self, id: &RecordId, change: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut T),
    {
        let mut records = self.load_all();
        let Some(index) = records.iter().position(|r| r.id() == id) else {
            return Ok(None);
        };

        let mut record = records[index].clone();
        change(&mut record);
        if record.id() != id {
            return Err(StoreError::InvalidOperation(format!(
                "record id cannot change ({} -> {})",
                id,
                record.id()
            )));
        }
        record.touch(Timestamp::now());

        records[index] = record.clone();
        if !self.save_edited(&mut records, index, id)? {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Remove the record with `id`. Removing an absent id is a no-op that
    /// neither writes nor notifies.
    pub fn remove(&self, id: &RecordId) -> Result<bool> {
        let mut records = self.load_all();
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Ok(false);
        }

        self.collection
            .save_all(&mut records, Change::Removed { id: id.clone() })?;
        Ok(true)
    }

    /// Remove every record matching `predicate`. Returns how many went.
    pub fn remove_where<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&T) -> bool,
    {
        let mut records = self.load_all();
        let before = records.len();
        records.retain(|r| !predicate(r));
        let removed = before - records.len();
        if removed > 0 {
            self.collection.save_all(&mut records, Change::Replaced)?;
        }
        Ok(removed)
    }

    /// Save after editing the record at `index`. Returns false when the
    /// quota trim dropped that record, which is then announced as removed.
    fn save_edited(&self, records: &mut Vec<T>, index: usize, id: &RecordId) -> Result<bool> {
        let outcome = self.collection.persist(records)?;
        let kept = index < records.len();
        let change = if kept {
            Change::Updated { id: id.clone() }
        } else {
            Change::Removed { id: id.clone() }
        };
        self.collection.announce(change, outcome.trimmed);
        Ok(kept)
    }

    fn push_front(&self, record: T) -> Result<T> {
        let mut records = self.load_all();
        records.insert(0, record.clone());
        self.collection.save_all(
            &mut records,
            Change::Added {
                id: record.id().clone(),
            },
        )?;
        Ok(record)
    }

    fn decode(&self, value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| {
            StoreError::InvalidOperation(format!(
                "invalid {} record: {}",
                self.collection.key(),
                e
            ))
        })
    }
}

fn into_object(value: Value) -> Result<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(serde_json::Map::new()),
        other => Err(StoreError::InvalidOperation(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::test_support::context;
    use crate::events::TopicFilter;
    use crate::kv::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Note {
        id: RecordId,
        #[serde(default)]
        text: String,
        #[serde(default)]
        owner: UserId,
        #[serde(default)]
        created_at: Timestamp,
        #[serde(default)]
        updated_at: Timestamp,
    }

    impl Entity for Note {
        const TOPIC: Topic = Topic::Feed;

        fn id(&self) -> &RecordId {
            &self.id
        }

        fn blank(id: RecordId, now: Timestamp, actor: &UserId) -> Self {
            Note {
                id,
                text: String::new(),
                owner: actor.clone(),
                created_at: now,
                updated_at: now,
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

    #[test]
    fn test_load_all_on_empty_store() {
        let repo: Repository<Note> = Repository::new(context());
        assert!(repo.load_all().is_empty());
    }

    #[test]
    fn test_corrupt_data_reads_as_empty() {
        let ctx = context();
        ctx.store.set("feed", "{not json").unwrap();

        let repo: Repository<Note> = Repository::new(ctx);
        assert!(repo.load_all().is_empty());
        assert!(repo.get_by_id(&RecordId::from("1")).is_none());
    }

    #[test]
    fn test_add_merges_over_defaults() {
        let repo: Repository<Note> = Repository::new(context());

        let note = repo.add(json!({"text": "hello", "id": "forged"})).unwrap();
        assert_ne!(note.id, RecordId::from("forged"));
        assert_eq!(note.text, "hello");
        assert_eq!(note.owner, UserId::from("alice"));
        assert_eq!(repo.get_by_id(&note.id), Some(note));
    }

    #[test]
    fn test_add_keeps_newest_first() {
        let repo: Repository<Note> = Repository::new(context());
        let first = repo.add(json!({"text": "first"})).unwrap();
        let second = repo.add(json!({"text": "second"})).unwrap();

        let ids: Vec<_> = repo.load_all().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_update_round_trip() {
        let repo: Repository<Note> = Repository::new(context());
        let note = repo.add(json!({"text": "draft"})).unwrap();

        let updated = repo
            .update(&note.id, json!({"text": "final", "id": "other"}))
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, note.id);
        assert_eq!(updated.text, "final");
        assert_eq!(updated.created_at, note.created_at);
        assert!(updated.updated_at >= note.updated_at);

        assert_eq!(repo.get_by_id(&note.id).unwrap().text, "final");
    }

    #[test]
    fn test_update_missing_returns_none() {
        let repo: Repository<Note> = Repository::new(context());
        assert!(repo
            .update(&RecordId::from("404"), json!({"text": "x"}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_rejects_bad_shape() {
        let repo: Repository<Note> = Repository::new(context());
        let note = repo.add(json!({})).unwrap();

        let result = repo.update(&note.id, json!({"text": 5}));
        assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
        let result = repo.update(&note.id, json!([1, 2]));
        assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
    }

    #[test]
    fn test_modify_cannot_change_id() {
        let repo: Repository<Note> = Repository::new(context());
        let note = repo.add(json!({})).unwrap();

        let result = repo.modify(&note.id, |n| n.id = RecordId::from("hijack"));
        assert!(matches!(result, Err(StoreError::InvalidOperation(_))));

        let renamed = repo.modify(&note.id, |n| n.text = "typed".into()).unwrap().unwrap();
        assert_eq!(renamed.text, "typed");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let repo: Repository<Note> = Repository::new(context());
        let note = repo.add(json!({})).unwrap();

        assert!(repo.remove(&note.id).unwrap());
        assert!(repo.get_by_id(&note.id).is_none());
        assert!(!repo.remove(&note.id).unwrap());
    }

    #[test]
    fn test_ids_from_numbers_match() {
        let ctx = context();
        ctx.store
            .set("feed", r#"[{"id": 1700000000000, "text": "legacy"}]"#)
            .unwrap();

        let repo: Repository<Note> = Repository::new(ctx);
        let found = repo.get_by_id(&RecordId::from("1700000000000")).unwrap();
        assert_eq!(found.text, "legacy");
    }

    #[test]
    fn test_each_mutation_notifies_once() {
        let ctx = context();
        let sub = ctx.bus.subscribe(crate::events::SubscriptionConfig {
            filter: TopicFilter::only(Topic::Feed),
            ..Default::default()
        });
        let repo: Repository<Note> = Repository::new(ctx);

        let note = repo.add(json!({})).unwrap();
        repo.update(&note.id, json!({"text": "x"})).unwrap();
        repo.remove(&note.id).unwrap();
        repo.remove(&note.id).unwrap();

        let changes: Vec<_> = sub.drain().into_iter().map(|e| e.change).collect();
        assert_eq!(
            changes,
            vec![
                Change::Added { id: note.id.clone() },
                Change::Updated { id: note.id.clone() },
                Change::Removed { id: note.id.clone() },
            ]
        );
        assert!(sub.recv_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_upsert_keeps_caller_id() {
        let repo: Repository<Note> = Repository::new(context());
        let note = Note::blank(RecordId::from("fixed"), Timestamp(1), &UserId::from("me"));

        let stored = repo.upsert(note.clone()).unwrap();
        assert_eq!(stored.id, RecordId::from("fixed"));

        let mut changed = stored.clone();
        changed.text = "changed".into();
        repo.upsert(changed).unwrap();
        assert_eq!(repo.count(), 1);
        assert_eq!(repo.get_by_id(&note.id).unwrap().text, "changed");
    }

    #[test]
    fn test_remove_where() {
        let repo: Repository<Note> = Repository::new(context());
        repo.add(json!({"text": "keep"})).unwrap();
        repo.add(json!({"text": "drop"})).unwrap();
        repo.add(json!({"text": "drop"})).unwrap();

        assert_eq!(repo.remove_where(|n| n.text == "drop").unwrap(), 2);
        assert_eq!(repo.count(), 1);
        assert_eq!(repo.remove_where(|n| n.text == "drop").unwrap(), 0);
    }

    #[test]
    fn test_bad_field_resets_to_default() {
        let ctx = context();
        ctx.store
            .set("feed", r#"[{"id": 1, "text": 5, "owner": "bob"}, {"id": 2, "text": "fine"}]"#)
            .unwrap();
        let repo: Repository<Note> = Repository::new(ctx);

        let notes = repo.load_all();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].id, RecordId::from("1"));
        assert_eq!(notes[0].text, "");
        assert_eq!(notes[0].owner, UserId::from("bob"));

        // A later write keeps every readable record.
        repo.add(json!({"text": "new"})).unwrap();
        assert_eq!(repo.count(), 3);
    }

    #[test]
    fn test_unreadable_entry_is_skipped() {
        let ctx = context();
        ctx.store.set("feed", r#"[3, {"id": "2", "text": "kept"}]"#).unwrap();
        let repo: Repository<Note> = Repository::new(ctx);

        let notes = repo.load_all();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "kept");
    }

    #[test]
    fn test_update_trimmed_away_returns_none() {
        let ctx = quota_context(400);
        let sub = ctx.bus.subscribe_to(Topic::Feed);
        let repo: Repository<Note> = Repository::new(ctx);
        let oldest = repo.add(json!({})).unwrap();
        repo.add(json!({})).unwrap();
        repo.add(json!({})).unwrap();
        sub.drain();

        let result = repo.update(&oldest.id, json!({"text": "x".repeat(200)})).unwrap();
        assert!(result.is_none());
        assert!(repo.get_by_id(&oldest.id).is_none());
        assert_eq!(repo.count(), 2);

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change, Change::Removed { id: oldest.id.clone() });
        assert_eq!(events[0].trimmed, 1);
    }

    fn quota_context(quota: usize) -> NestContext {
        crate::collections::test_support::context_with_store(Arc::new(MemoryStore::with_quota(quota)))
    }
}
