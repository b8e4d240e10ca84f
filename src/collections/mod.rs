//! Typed collections over the key-value store.
//!
//! Three shapes cover every persisted concern:
//! - [`Collection`]: a JSON array under one key, newest entry first.
//! - [`Repository`]: a collection of [`Entity`] records addressed by id.
//! - [`Document`]: a single JSON object merged over its defaults on read.
//!
//! Reads never fail: a missing or corrupt value yields the empty default.
//! Writes go through the quota-aware save pipeline and publish a
//! [`ChangeEvent`](crate::events::ChangeEvent) when they succeed.

mod document;
mod repository;

pub mod family;
pub mod feed;
pub mod pets;
pub mod photos;
pub mod settings;
pub mod social;
pub mod vaccines;

pub use document::Document;
pub use repository::{Collection, Entity, Repository};

use crate::events::EventBus;
use crate::identity::IdentityProvider;
use crate::kv::KeyValueStore;
use crate::types::IdGenerator;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Everything a collection needs to read, write and announce changes.
#[derive(Clone)]
pub struct NestContext {
    pub store: Arc<dyn KeyValueStore>,
    pub bus: EventBus,
    pub ids: Arc<IdGenerator>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl NestContext {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        bus: EventBus,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            bus,
            ids: Arc::new(IdGenerator::new()),
            identity,
        }
    }
}

/// Copy top-level fields of `patch` onto `target`, skipping `protected` keys.
pub(crate) fn shallow_merge(target: &mut Map<String, Value>, patch: Map<String, Value>, protected: &[&str]) {
    for (key, value) in patch {
        if protected.contains(&key.as_str()) {
            continue;
        }
        target.insert(key, value);
    }
}

/// Merge `overlay` onto `base`, recursing into objects present on both sides.
pub(crate) fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let nested = value.is_object() && base_map.get(&key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = base_map.get_mut(&key) {
                        deep_merge(existing, value);
                    }
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shallow_merge_skips_protected() {
        let mut target = json!({"id": "1", "name": "Rex", "weight": 10})
            .as_object()
            .cloned()
            .unwrap();
        let patch = json!({"id": "2", "name": "Max"}).as_object().cloned().unwrap();

        shallow_merge(&mut target, patch, &["id"]);
        assert_eq!(target["id"], "1");
        assert_eq!(target["name"], "Max");
        assert_eq!(target["weight"], 10);
    }

    #[test]
    fn test_deep_merge_keeps_nested_defaults() {
        let mut base = json!({"theme": "light", "notifications": {"email": true, "push": false}});
        deep_merge(&mut base, json!({"notifications": {"push": true}}));

        assert_eq!(
            base,
            json!({"theme": "light", "notifications": {"email": true, "push": true}})
        );
    }
}
