//! Trim-and-retry properties of the save pipeline.

use petnest::{save_safely, KeyValueStore, MemoryStore, PetNest, StaticIdentity, Topic};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn encoded_len(items: &[String]) -> usize {
    serde_json::to_string(items).unwrap().len()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever survives is a prefix of the input (newest kept) and the
    /// trim count accounts for every dropped entry.
    #[test]
    fn prop_trim_keeps_newest_prefix(
        items in prop::collection::vec("[a-z]{0,40}", 1..40),
        quota in 0usize..2048,
    ) {
        let store = MemoryStore::with_quota(quota);
        let original = items.clone();
        let mut items = items;

        match save_safely(&store, "items", &mut items) {
            Ok(outcome) => {
                prop_assert_eq!(items.len() + outcome.trimmed, original.len());
                prop_assert_eq!(&items[..], &original[..items.len()]);
                prop_assert!(!items.is_empty());
                prop_assert!("items".len() + encoded_len(&items) <= quota);

                let stored: Vec<String> =
                    serde_json::from_str(&store.get("items").unwrap().unwrap()).unwrap();
                prop_assert_eq!(stored, items.clone());

                // Keeping one more entry would not have fit.
                if outcome.trimmed > 0 {
                    let one_more = &original[..items.len() + 1];
                    prop_assert!("items".len() + encoded_len(one_more) > quota);
                }
            }
            Err(e) => {
                prop_assert!(e.is_capacity_exceeded());
                prop_assert_eq!(&items, &original);
                prop_assert!("items".len() + encoded_len(&original[..1]) > quota);
                prop_assert!(store.get("items").unwrap().is_none());
            }
        }
    }

    /// A save that fits is never trimmed.
    #[test]
    fn prop_fitting_save_is_untouched(items in prop::collection::vec(any::<u32>(), 0..50)) {
        let store = MemoryStore::unbounded();
        let mut saved = items.clone();
        let outcome = save_safely(&store, "items", &mut saved).unwrap();

        prop_assert_eq!(outcome.trimmed, 0);
        prop_assert_eq!(saved, items);
    }
}

#[test]
fn test_full_store_drops_oldest_photos() {
    let quota = 4096;
    let nest = PetNest::with_store(
        Arc::new(MemoryStore::with_quota(quota)),
        petnest::EventBus::new(),
        Arc::new(StaticIdentity::default()),
    );
    let sub = nest.bus().subscribe_to(Topic::Photos);
    let image = format!("data:image/png;base64,{}", "A".repeat(900));

    let mut uploaded = Vec::new();
    for i in 0..10 {
        uploaded.push(nest.photos().upload(image.clone(), format!("#{}", i), vec![]).unwrap());
    }

    let stored = nest.photos().load_all();
    assert!(stored.len() < 10);
    assert_eq!(stored[0].id, uploaded[9].id);
    assert!(nest.usage().used_bytes <= quota);

    let trimmed: usize = sub.drain().iter().map(|e| e.trimmed).sum();
    assert_eq!(trimmed, 10 - stored.len());
}

#[test]
fn test_trimmed_collection_survives_reload() {
    let store = Arc::new(MemoryStore::with_quota(600));
    let nest = PetNest::with_store(
        store.clone(),
        petnest::EventBus::new(),
        Arc::new(StaticIdentity::default()),
    );

    for i in 0..50 {
        nest.pets().add(json!({"name": format!("pet-{}", i)})).unwrap();
    }

    let pets = nest.pets().load_all();
    assert_eq!(pets[0].name, "pet-49");
    let raw = store.get("pets").unwrap().unwrap();
    assert_eq!(serde_json::from_str::<Vec<serde_json::Value>>(&raw).unwrap().len(), pets.len());
}
