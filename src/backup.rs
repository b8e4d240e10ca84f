//! Whole-store backup and restore.
//!
//! A backup is a JSON document holding the settings object and every
//! storage key with its raw JSON string. Restoring writes those strings back
//! verbatim, so collections round-trip byte for byte.

use crate::collections::settings::SettingsStore;
use crate::collections::NestContext;
use crate::error::{Result, StoreError};
use crate::events::{Change, ChangeEvent, Topic};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Current backup format version.
pub const BACKUP_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub exported_at: Option<Timestamp>,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default)]
    pub storage: BTreeMap<String, String>,
}

fn default_version() -> u32 {
    BACKUP_VERSION
}

/// What a restore touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub keys_written: usize,
    pub topics: Vec<Topic>,
}

impl Backup {
    /// Snapshot every key in the store.
    pub fn export(ctx: &NestContext) -> Result<Backup> {
        let mut storage = BTreeMap::new();
        for key in ctx.store.keys()? {
            if let Some(raw) = ctx.store.get(&key)? {
                storage.insert(key, raw);
            }
        }

        let settings = serde_json::to_value(SettingsStore::new(ctx.clone()).load())?;
        tracing::debug!(keys = storage.len(), "exported backup");

        Ok(Backup {
            version: BACKUP_VERSION,
            exported_at: Some(Timestamp::now()),
            settings: Some(settings),
            storage,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a backup file.
    pub fn from_json(raw: &str) -> Result<Backup> {
        let backup: Backup =
            serde_json::from_str(raw).map_err(|e| StoreError::InvalidBackup(e.to_string()))?;
        backup.validate()?;
        Ok(backup)
    }

    fn validate(&self) -> Result<()> {
        if self.version > BACKUP_VERSION {
            return Err(StoreError::InvalidBackup(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if let Some(settings) = &self.settings {
            if !settings.is_object() {
                return Err(StoreError::InvalidBackup("settings is not an object".into()));
            }
        }
        if self.storage.keys().any(|key| key.is_empty()) {
            return Err(StoreError::InvalidBackup("empty storage key".into()));
        }
        Ok(())
    }

    /// Write the backup into the store and announce every affected topic.
    ///
    /// Storage strings are written first, then settings. Keys absent from the
    /// backup are left alone. The whole backup is checked against the quota
    /// before anything is written; if a write still fails part way, the
    /// topics already written are announced before the error is returned.
    pub fn import(&self, ctx: &NestContext) -> Result<ImportReport> {
        self.validate()?;

        let settings = match &self.settings {
            Some(settings) => Some(serde_json::to_string(settings)?),
            None => None,
        };
        let mut writes: Vec<(&str, &str)> = self
            .storage
            .iter()
            .map(|(key, raw)| (key.as_str(), raw.as_str()))
            .collect();
        if let Some(settings) = &settings {
            writes.push((Topic::Settings.storage_key(), settings.as_str()));
        }

        Self::check_fits(ctx, &writes)?;

        let mut touched = BTreeSet::new();
        let mut keys_written = 0;
        let mut failure = None;
        for (key, raw) in writes {
            if let Err(e) = ctx.store.set(key, raw) {
                failure = Some(e);
                break;
            }
            keys_written += 1;
            if let Some(topic) = Topic::from_storage_key(key) {
                touched.insert(topic);
            }
        }

        for topic in &touched {
            ctx.bus.publish(ChangeEvent::new(*topic, Change::Imported));
        }

        if let Some(e) = failure {
            tracing::warn!(keys_written, error = %e, "backup import stopped part way");
            return Err(e);
        }

        tracing::info!(keys_written, topics = touched.len(), "imported backup");
        Ok(ImportReport {
            keys_written,
            topics: touched.into_iter().collect(),
        })
    }

    /// Usage after every write replaces its key must stay within the quota.
    fn check_fits(ctx: &NestContext, writes: &[(&str, &str)]) -> Result<()> {
        let usage = ctx.store.usage();
        let mut freed = 0;
        let mut needed = 0;
        let mut seen = BTreeSet::new();
        for (key, raw) in writes {
            // The last write to a key wins; earlier ones never stay stored.
            if !seen.insert(*key) {
                continue;
            }
            let last = writes
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, raw)| raw.len())
                .unwrap_or(raw.len());
            if let Some(existing) = ctx.store.get(key)? {
                freed += key.len() + existing.len();
            }
            needed += key.len() + last;
        }

        let available = usage.quota_bytes.saturating_sub(usage.used_bytes.saturating_sub(freed));
        if needed > available {
            return Err(StoreError::CapacityExceeded {
                key: "backup".into(),
                needed,
                available,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::pets::Pets;
    use crate::collections::settings::Theme;
    use crate::collections::test_support::context;
    use crate::collections::test_support::context_with_store;
    use crate::events::SubscriptionConfig;
    use crate::kv::{Capacity, KeyValueStore, MemoryStore};
    use crate::types::StorageUsage;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_export_import_round_trip() {
        let source = context();
        let pets = Pets::new(source.clone());
        pets.add(json!({"name": "Rex", "species": "dog"})).unwrap();
        SettingsStore::new(source.clone()).set_theme(Theme::Dark).unwrap();
        source.store.set("legacy-key", "[1,2]").unwrap();

        let json = Backup::export(&source).unwrap().to_json().unwrap();

        let target = context();
        let sub = target.bus.subscribe(SubscriptionConfig::default());
        let report = Backup::from_json(&json).unwrap().import(&target).unwrap();

        assert_eq!(
            target.store.get("pets").unwrap(),
            source.store.get("pets").unwrap()
        );
        assert_eq!(target.store.get("legacy-key").unwrap().as_deref(), Some("[1,2]"));
        assert_eq!(SettingsStore::new(target.clone()).load().theme, Theme::Dark);
        assert_eq!(report.topics, vec![Topic::Pets, Topic::Settings]);

        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.change == Change::Imported));
    }

    #[test]
    fn test_minimal_backup_is_accepted() {
        let backup = Backup::from_json(r#"{"storage": {"feed": "[]"}}"#).unwrap();
        assert_eq!(backup.version, BACKUP_VERSION);
        assert!(backup.settings.is_none());

        let ctx = context();
        let report = backup.import(&ctx).unwrap();
        assert_eq!(report.keys_written, 1);
        assert_eq!(report.topics, vec![Topic::Feed]);
    }

    #[test]
    fn test_malformed_backups_are_rejected() {
        for raw in [
            "not json",
            r#"{"storage": {"pets": 5}}"#,
            r#"{"settings": [1, 2]}"#,
            r#"{"version": 99}"#,
        ] {
            assert!(
                matches!(Backup::from_json(raw), Err(StoreError::InvalidBackup(_))),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn test_backup_over_quota_writes_nothing() {
        let ctx = context_with_store(Arc::new(MemoryStore::with_quota(60)));
        let sub = ctx.bus.subscribe(SubscriptionConfig::default());
        let backup = Backup::from_json(&format!(
            r#"{{"storage": {{"feed": "[1]", "pets": "{}"}}}}"#,
            "x".repeat(80)
        ))
        .unwrap();

        let result = backup.import(&ctx);
        assert!(matches!(result, Err(StoreError::CapacityExceeded { .. })));
        assert_eq!(ctx.store.get("feed").unwrap(), None);
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_backup_replacing_large_values_fits() {
        let ctx = context_with_store(Arc::new(MemoryStore::with_quota(60)));
        ctx.store.set("pets", &"x".repeat(40)).unwrap();

        // Replacing the 40-byte value with a 45-byte one fits once the old
        // value is freed.
        let mut backup = Backup::from_json("{}").unwrap();
        backup.storage.insert("pets".into(), "y".repeat(45));
        assert_eq!(backup.import(&ctx).unwrap().keys_written, 1);
    }

    /// Store that refuses writes to one key with an I/O error.
    struct BrokenKey {
        inner: MemoryStore,
        broken: &'static str,
    }

    impl KeyValueStore for BrokenKey {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == self.broken {
                return Err(StoreError::Io(std::io::Error::other("disk gone")));
            }
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<bool> {
            self.inner.remove(key)
        }
        fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys()
        }
        fn clear(&self) -> Result<()> {
            self.inner.clear()
        }
        fn usage(&self) -> StorageUsage {
            self.inner.usage()
        }
        fn check_capacity(&self, key: &str, value_len: usize) -> Capacity {
            self.inner.check_capacity(key, value_len)
        }
    }

    #[test]
    fn test_failed_import_announces_written_topics() {
        let ctx = context_with_store(Arc::new(BrokenKey {
            inner: MemoryStore::new(),
            broken: "pets",
        }));
        let sub = ctx.bus.subscribe(SubscriptionConfig::default());
        let backup = Backup::from_json(r#"{"storage": {"feed": "[]", "pets": "[]"}}"#).unwrap();

        assert!(matches!(backup.import(&ctx), Err(StoreError::Io(_))));
        assert_eq!(ctx.store.get("feed").unwrap().as_deref(), Some("[]"));

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, Topic::Feed);
        assert_eq!(events[0].change, Change::Imported);
    }
}
