//! Persistent single-file backend.
//!
//! Layout under the store directory:
//!
//! ```text
//! MANIFEST      magic + version
//! LOCK          exclusive advisory lock while open
//! storage.bin   magic, version, u64 body length, MessagePack map, CRC32
//! ```
//!
//! Every mutation rewrites `storage.bin` through a temp file and a rename,
//! so a crash leaves either the old or the new contents.

use super::{capacity_for, Capacity, KeyValueStore};
use crate::error::{Result, StoreError};
use crate::types::StorageUsage;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the store manifest.
const MANIFEST_MAGIC: &[u8; 4] = b"PNM\0";

/// Magic bytes for the data file.
const DATA_MAGIC: &[u8; 4] = b"PNS\0";

/// Current on-disk format version.
const FORMAT_VERSION: u8 = 1;

const DATA_FILE: &str = "storage.bin";

/// Magic, version, length and checksum around the body.
const DATA_OVERHEAD: u64 = 4 + 1 + 8 + 4;

struct Inner {
    entries: BTreeMap<String, String>,
    used_bytes: usize,
}

/// Key-value store persisted to a directory.
pub struct FileStore {
    path: PathBuf,
    quota_bytes: usize,
    inner: Mutex<Inner>,
    _lock_file: File,
}

impl FileStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(path: impl AsRef<Path>, quota_bytes: usize) -> Result<Self> {
        let path = path.as_ref();
        if path.join("MANIFEST").exists() {
            Self::open(path, quota_bytes)
        } else {
            Self::create(path, quota_bytes)
        }
    }

    /// Create a new, empty store.
    pub fn create(path: impl AsRef<Path>, quota_bytes: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Self::write_manifest(&path)?;

        let lock_file = Self::acquire_lock(&path)?;
        let entries = BTreeMap::new();
        Self::write_data(&path, &entries)?;

        Ok(Self {
            path,
            quota_bytes,
            inner: Mutex::new(Inner {
                entries,
                used_bytes: 0,
            }),
            _lock_file: lock_file,
        })
    }

    /// Open an existing store.
    pub fn open(path: impl AsRef<Path>, quota_bytes: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.join("MANIFEST").exists() {
            return Err(StoreError::NotInitialized);
        }
        Self::verify_manifest(&path)?;

        let lock_file = Self::acquire_lock(&path)?;
        let entries = if path.join(DATA_FILE).exists() {
            Self::read_data(&path)?
        } else {
            BTreeMap::new()
        };
        let used_bytes = entries.iter().map(|(k, v)| k.len() + v.len()).sum();

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened file store");

        Ok(Self {
            path,
            quota_bytes,
            inner: Mutex::new(Inner {
                entries,
                used_bytes,
            }),
            _lock_file: lock_file,
        })
    }

    /// Store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(MANIFEST_MAGIC)?;
        file.write_all(&[FORMAT_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MANIFEST_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }

    fn write_data(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
        let body = rmp_serde::to_vec(entries)?;
        let checksum = crc32fast::hash(&body);

        let tmp_path = path.join(format!("{}.tmp", DATA_FILE));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(DATA_MAGIC)?;
            file.write_all(&[FORMAT_VERSION])?;
            file.write_all(&(body.len() as u64).to_le_bytes())?;
            file.write_all(&body)?;
            file.write_all(&checksum.to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path.join(DATA_FILE))?;
        Ok(())
    }

    fn read_data(path: &Path) -> Result<BTreeMap<String, String>> {
        let mut file = File::open(path.join(DATA_FILE))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != DATA_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid data file magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported data file version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        let file_len = file.metadata()?.len();
        if len > file_len.saturating_sub(DATA_OVERHEAD) {
            return Err(StoreError::Corruption(format!(
                "body length {} exceeds file size {}",
                len, file_len
            )));
        }

        let mut body = vec![0u8; len as usize];
        file.read_exact(&mut body)
            .map_err(|e| StoreError::Corruption(format!("truncated data file: {}", e)))?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)
            .map_err(|e| StoreError::Corruption(format!("missing checksum: {}", e)))?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&body);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        Ok(rmp_serde::from_slice(&body)?)
    }

    fn usage_of(&self, inner: &Inner) -> StorageUsage {
        StorageUsage {
            used_bytes: inner.used_bytes,
            quota_bytes: self.quota_bytes,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock();

        let existing = inner
            .entries
            .get(key)
            .map(|v| key.len() + v.len())
            .unwrap_or(0);
        if let Capacity::Exceeds { needed, available } =
            capacity_for(self.usage_of(&inner), existing, key, value.len())
        {
            return Err(StoreError::CapacityExceeded {
                key: key.to_string(),
                needed,
                available,
            });
        }

        let previous = inner.entries.insert(key.to_string(), value.to_string());
        if let Err(e) = Self::write_data(&self.path, &inner.entries) {
            // Keep memory and disk in agreement.
            match previous {
                Some(old) => inner.entries.insert(key.to_string(), old),
                None => inner.entries.remove(key),
            };
            return Err(e);
        }
        inner.used_bytes = inner.used_bytes - existing + key.len() + value.len();
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(old) = inner.entries.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = Self::write_data(&self.path, &inner.entries) {
            inner.entries.insert(key.to_string(), old);
            return Err(e);
        }
        inner.used_bytes -= key.len() + old.len();
        Ok(true)
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().entries.keys().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::write_data(&self.path, &BTreeMap::new())?;
        inner.entries.clear();
        inner.used_bytes = 0;
        Ok(())
    }

    fn usage(&self) -> StorageUsage {
        let inner = self.inner.lock();
        self.usage_of(&inner)
    }

    fn check_capacity(&self, key: &str, value_len: usize) -> Capacity {
        let inner = self.inner.lock();
        let existing = inner
            .entries
            .get(key)
            .map(|v| key.len() + v.len())
            .unwrap_or(0);
        capacity_for(self.usage_of(&inner), existing, key, value_len)
    }
}
