//! Single-object documents merged over defaults.

use super::{deep_merge, NestContext};
use crate::error::Result;
use crate::events::{Change, ChangeEvent, Topic};
use crate::quota::save_value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

/// One JSON object under one storage key.
///
/// Reads merge the stored object over `T::default()`, recursing into nested
/// objects, so fields added after data was written still get defaults.
/// Writes overwrite the stored object wholesale.
pub struct Document<T> {
    ctx: NestContext,
    topic: Topic,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned + Default> Document<T> {
    pub fn new(ctx: NestContext, topic: Topic) -> Self {
        Self {
            ctx,
            topic,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        self.topic.storage_key()
    }

    /// Stored value merged over defaults. Never fails.
    pub fn load(&self) -> T {
        let Some(stored) = self.stored_object() else {
            return T::default();
        };

        let mut merged = match serde_json::to_value(T::default()) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = self.key(), error = %e, "default does not serialize");
                return T::default();
            }
        };
        deep_merge(&mut merged, stored);

        serde_json::from_value(merged).unwrap_or_else(|e| {
            tracing::warn!(key = self.key(), error = %e, "stored document has wrong shape, using defaults");
            T::default()
        })
    }

    /// Whether anything is stored under the key.
    pub fn exists(&self) -> bool {
        self.stored_object().is_some()
    }

    /// Overwrite the stored document.
    pub fn save(&self, doc: &T) -> Result<()> {
        save_value(self.ctx.store.as_ref(), self.key(), doc)?;
        self.ctx
            .bus
            .publish(ChangeEvent::new(self.topic, Change::Replaced));
        Ok(())
    }

    /// Load, change, save.
    pub fn update<F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut T),
    {
        let mut doc = self.load();
        change(&mut doc);
        self.save(&doc)?;
        Ok(doc)
    }

    /// Drop the stored document so reads return defaults again.
    pub fn reset(&self) -> Result<T> {
        if self.ctx.store.remove(self.key())? {
            self.ctx
                .bus
                .publish(ChangeEvent::new(self.topic, Change::Replaced));
        }
        Ok(T::default())
    }

    fn stored_object(&self) -> Option<Value> {
        let raw = match self.ctx.store.get(self.key()) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key = self.key(), error = %e, "read failed, using defaults");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value @ Value::Object(_)) => Some(value),
            Ok(_) => {
                tracing::warn!(key = self.key(), "stored document is not an object");
                None
            }
            Err(e) => {
                tracing::warn!(key = self.key(), error = %e, "corrupt document, using defaults");
                None
            }
        }
    }
}
