//! In-memory backend with a byte quota.

use super::{capacity_for, Capacity, KeyValueStore, DEFAULT_QUOTA_BYTES};
use crate::error::{Result, StoreError};
use crate::types::StorageUsage;
use parking_lot::RwLock;
use std::collections::BTreeMap;

struct Inner {
    entries: BTreeMap<String, String>,
    used_bytes: usize,
}

/// Process-local key-value store.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    quota_bytes: usize,
}

impl MemoryStore {
    /// Create a store with the default quota.
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    /// Create a store that refuses writes beyond `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: BTreeMap::new(),
                used_bytes: 0,
            }),
            quota_bytes,
        }
    }

    /// Create a store without a practical quota.
    pub fn unbounded() -> Self {
        Self::with_quota(usize::MAX)
    }

    fn entry_size(key: &str, value: &str) -> usize {
        key.len() + value.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write();

        let existing = inner
            .entries
            .get(key)
            .map(|v| Self::entry_size(key, v))
            .unwrap_or(0);
        let usage = StorageUsage {
            used_bytes: inner.used_bytes,
            quota_bytes: self.quota_bytes,
        };
        if let Capacity::Exceeds { needed, available } =
            capacity_for(usage, existing, key, value.len())
        {
            return Err(StoreError::CapacityExceeded {
                key: key.to_string(),
                needed,
                available,
            });
        }

        inner.used_bytes = inner.used_bytes - existing + Self::entry_size(key, value);
        inner.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.entries.remove(key) {
            Some(value) => {
                inner.used_bytes -= Self::entry_size(key, &value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().entries.keys().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.used_bytes = 0;
        Ok(())
    }

    fn usage(&self) -> StorageUsage {
        StorageUsage {
            used_bytes: self.inner.read().used_bytes,
            quota_bytes: self.quota_bytes,
        }
    }

    fn check_capacity(&self, key: &str, value_len: usize) -> Capacity {
        let inner = self.inner.read();
        let existing = inner
            .entries
            .get(key)
            .map(|v| Self::entry_size(key, v))
            .unwrap_or(0);
        let usage = StorageUsage {
            used_bytes: inner.used_bytes,
            quota_bytes: self.quota_bytes,
        };
        capacity_for(usage, existing, key, value_len)
    }
}
