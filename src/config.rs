//! Configuration for opening a nest.

use crate::kv::DEFAULT_QUOTA_BYTES;
use std::path::PathBuf;

/// Where collections are persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// In-process only; lost when the nest is dropped.
    Memory,
    /// Locked single-file store under [`NestConfig::path`].
    #[default]
    File,
}

/// Configuration for a [`PetNest`](crate::PetNest).
#[derive(Clone, Debug)]
pub struct NestConfig {
    /// Store directory (file backend only).
    pub path: PathBuf,

    /// Byte quota across all keys.
    pub quota_bytes: usize,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Capacity of each subscription channel.
    pub event_buffer_size: usize,

    pub backend: Backend,
}

impl Default for NestConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./petnest"),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            create_if_missing: true,
            event_buffer_size: 256,
            backend: Backend::File,
        }
    }
}

impl NestConfig {
    /// File-backed configuration rooted at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// In-memory configuration.
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            ..Default::default()
        }
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }
}
