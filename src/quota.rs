//! Quota-aware save pipeline.
//!
//! Collections are kept newest-first, so the tail holds the oldest entries.
//! When a list does not fit the store's quota, entries are dropped from the
//! tail one at a time until the remainder fits. The caller learns how many
//! were dropped. If not even a single entry fits, the first capacity error
//! is returned and nothing is written.

use crate::error::{Result, StoreError};
use crate::kv::{Capacity, KeyValueStore};
use serde::Serialize;

/// Result of a successful save.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Oldest entries dropped to fit the quota.
    pub trimmed: usize,
    /// Bytes written for the value.
    pub bytes: usize,
}

/// Persist `items` under `key`, trimming oldest entries on capacity errors.
///
/// On success `items` is truncated to what was persisted. On failure it is
/// left untouched.
pub fn save_safely<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    items: &mut Vec<T>,
) -> Result<SaveOutcome> {
    let mut keep = items.len();
    let mut first_error: Option<StoreError> = None;

    loop {
        let encoded = serde_json::to_string(&items[..keep])?;

        let attempt = match store.check_capacity(key, encoded.len()) {
            Capacity::Fits => store.set(key, &encoded),
            Capacity::Exceeds { needed, available } => Err(StoreError::CapacityExceeded {
                key: key.to_string(),
                needed,
                available,
            }),
        };

        match attempt {
            Ok(()) => {
                let trimmed = items.len() - keep;
                if trimmed > 0 {
                    tracing::warn!(key, trimmed, kept = keep, "quota exceeded, dropped oldest entries");
                    items.truncate(keep);
                } else {
                    tracing::debug!(key, bytes = encoded.len(), "saved collection");
                }
                return Ok(SaveOutcome {
                    trimmed,
                    bytes: encoded.len(),
                });
            }
            Err(e) if e.is_capacity_exceeded() => {
                let error = first_error.take().unwrap_or(e);
                if keep <= 1 {
                    tracing::warn!(key, %error, "nothing fits the storage quota");
                    return Err(error);
                }
                first_error = Some(error);
                keep -= 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Persist a single value under `key`. No trimming applies.
pub fn save_value<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<SaveOutcome> {
    let encoded = serde_json::to_string(value)?;
    store.set(key, &encoded)?;
    tracing::debug!(key, bytes = encoded.len(), "saved document");
    Ok(SaveOutcome {
        trimmed: 0,
        bytes: encoded.len(),
    })
}
