//! Key-value storage backends.
//!
//! Every collection lives under one string key holding a JSON string. A
//! backend enforces a byte quota (key bytes plus value bytes) and reports
//! capacity explicitly, so the save pipeline can decide to trim before a
//! write instead of relying on a platform exception.
//!
//! Two backends are provided:
//! - [`MemoryStore`]: in-process map, the analogue of browser storage.
//! - [`FileStore`]: a locked, checksummed single-file store on disk.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::StorageUsage;

/// Default quota, matching the common browser allowance.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Outcome of an explicit capacity check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capacity {
    Fits,
    Exceeds { needed: usize, available: usize },
}

impl Capacity {
    pub fn fits(&self) -> bool {
        matches!(self, Capacity::Fits)
    }
}

/// Synchronous string key-value storage with a quota.
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`.
    ///
    /// Fails with [`StoreError::CapacityExceeded`](crate::StoreError::CapacityExceeded)
    /// when the write would exceed the quota; the previous value is kept.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Returns whether it was present.
    fn remove(&self, key: &str) -> Result<bool>;

    /// All keys currently stored, sorted.
    fn keys(&self) -> Result<Vec<String>>;

    /// Remove everything.
    fn clear(&self) -> Result<()>;

    /// Current usage against the quota.
    fn usage(&self) -> StorageUsage;

    /// Would writing `value_len` bytes under `key` fit?
    fn check_capacity(&self, key: &str, value_len: usize) -> Capacity;
}

/// Shared capacity arithmetic: replacing an entry frees its old size first.
pub(crate) fn capacity_for(
    usage: StorageUsage,
    existing_entry: usize,
    key: &str,
    value_len: usize,
) -> Capacity {
    let needed = key.len() + value_len;
    let available = usage
        .quota_bytes
        .saturating_sub(usage.used_bytes.saturating_sub(existing_entry));
    if needed <= available {
        Capacity::Fits
    } else {
        Capacity::Exceeds { needed, available }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_counts_replaced_entry() {
        let usage = StorageUsage { used_bytes: 90, quota_bytes: 100 };

        // New key of 3 + 10 bytes does not fit into the 10 free bytes.
        assert_eq!(
            capacity_for(usage, 0, "new", 10),
            Capacity::Exceeds { needed: 13, available: 10 }
        );

        // Replacing a 50 byte entry frees room.
        assert!(capacity_for(usage, 50, "old", 40).fits());
    }
}
