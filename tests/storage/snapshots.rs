//! Integration tests for store snapshots
//!
//! Tests snapshot round trips, identifier preservation, and transient reset.

use strata_foundation::{Type, Value, values};
use strata_storage::{ComponentSchema, ExecuteOptions, StoreSchema, TransactionalStore};

fn schema() -> StoreSchema {
    StoreSchema::new()
        .with_component("title", ComponentSchema::new(Type::String))
        .and_then(|s| s.with_component("weight", ComponentSchema::new(Type::Float).with_default(1.0)))
        .and_then(|s| s.with_component("selected", ComponentSchema::new(Type::Bool).with_default(false).transient()))
        .and_then(|s| s.with_resource("zoom", ComponentSchema::new(Type::Float).with_default(1.0)))
        .unwrap()
}

#[test]
fn round_trip_preserves_ids_and_free_list() {
    let mut store = TransactionalStore::from_schema(schema()).unwrap();
    let (keep, gone) = store
        .execute(ExecuteOptions::new(), |tx| {
            let keep = tx.insert(values! { "title" => "a", "weight" => 2.5 })?;
            let gone = tx.insert(values! { "title" => "b" })?;
            tx.delete(gone)?;
            tx.set_resource("zoom", 3.0)?;
            Ok((keep, gone))
        })
        .unwrap()
        .value;
    let data = store.to_data();

    let mut restored = TransactionalStore::from_schema(schema()).unwrap();
    restored.load(&data).unwrap();
    let s = restored.store();
    assert_eq!(s.get(keep, "weight"), Some(Value::Float(2.5)));
    assert!(!s.contains(gone));
    assert_eq!(s.free_list(), store.store().free_list());
    assert_eq!(s.resource_get("zoom"), Some(Value::Float(3.0)));
    assert_eq!(restored.to_data(), data);
}

#[test]
fn transient_columns_reset_on_restore() {
    let mut store = TransactionalStore::from_schema(schema()).unwrap();
    let entity = store
        .execute(ExecuteOptions::new(), |tx| tx.insert(values! { "title" => "a", "selected" => true }))
        .unwrap()
        .value;
    let data = store.to_data();

    let mut restored = TransactionalStore::from_schema(schema()).unwrap();
    restored.load(&data).unwrap();
    assert_eq!(restored.store().get(entity, "selected"), Some(Value::Bool(false)));
    assert_eq!(restored.store().get(entity, "title"), Some(Value::from("a")));
}

#[test]
fn snapshot_with_unknown_component_is_rejected() {
    let mut store = TransactionalStore::from_schema(schema()).unwrap();
    store
        .execute(ExecuteOptions::new(), |tx| tx.insert(values! { "title" => "a" }))
        .unwrap();
    let data = store.to_data();

    let narrow = StoreSchema::new()
        .with_component("weight", ComponentSchema::new(Type::Float))
        .unwrap();
    let mut other = TransactionalStore::from_schema(narrow).unwrap();
    assert!(other.load(&data).is_err());
    assert!(other.store().is_empty());
}

#[test]
fn compaction_keeps_contents() {
    let mut store = TransactionalStore::from_schema(schema()).unwrap();
    let entities = store
        .execute(ExecuteOptions::new(), |tx| {
            (0..20)
                .map(|i| tx.insert(values! { "title" => format!("n{i}") }))
                .collect::<strata_foundation::Result<Vec<_>>>()
        })
        .unwrap()
        .value;
    store
        .execute(ExecuteOptions::new(), |tx| {
            for entity in &entities[..15] {
                tx.delete(*entity)?;
            }
            Ok(())
        })
        .unwrap();
    store.compact();

    let s = store.store();
    assert_eq!(s.len(), 5);
    assert_eq!(s.get(entities[19], "title"), Some(Value::from("n19")));
}
