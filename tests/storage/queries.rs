//! Integration tests for select queries
//!
//! Tests include lists, filters, ordering, and resource exclusion.

use strata_foundation::{Entity, Type, Value, values};
use strata_storage::{Comparison, ComponentSchema, Direction, ExecuteOptions, Query, StoreSchema, TransactionalStore};

fn populated() -> (TransactionalStore, Vec<Entity>) {
    let schema = StoreSchema::new()
        .with_component("name", ComponentSchema::new(Type::String))
        .and_then(|s| s.with_component("hp", ComponentSchema::new(Type::Int).with_default(10)))
        .and_then(|s| s.with_component("enemy", ComponentSchema::new(Type::Bool).with_default(false)))
        .and_then(|s| s.with_resource("round", ComponentSchema::new(Type::Int).with_default(0)))
        .unwrap();
    let mut store = TransactionalStore::from_schema(schema).unwrap();
    let entities = store
        .execute(ExecuteOptions::new(), |tx| {
            Ok(vec![
                tx.insert(values! { "name" => "orc", "hp" => 30, "enemy" => true })?,
                tx.insert(values! { "name" => "elf", "hp" => 12 })?,
                tx.insert(values! { "name" => "bat", "hp" => 3, "enemy" => true })?,
                tx.insert(values! { "name" => "sign" })?,
            ])
        })
        .unwrap()
        .value;
    (store, entities)
}

#[test]
fn include_list_selects_by_archetype() {
    let (store, e) = populated();
    let s = store.store();
    assert_eq!(s.select(&Query::new(["hp"])), vec![e[0], e[1], e[2]]);
    assert_eq!(s.select(&Query::new(["name"])), e);
    assert_eq!(s.select(&Query::new(["enemy", "hp"])), vec![e[0], e[2]]);
}

#[test]
fn filters_test_values() {
    let (store, e) = populated();
    let s = store.store();
    let query = Query::new(["hp"])
        .filter("enemy", Comparison::Eq, true)
        .filter("hp", Comparison::Gt, 5);
    assert_eq!(s.select(&query), vec![e[0]]);
    assert!(s.matches(e[0], &query));
    assert!(!s.matches(e[2], &query));
}

#[test]
fn ordering_uses_keys_then_entity() {
    let (store, e) = populated();
    let s = store.store();
    let ascending = Query::new(["hp"]).order_by("hp", Direction::Asc);
    assert_eq!(s.select(&ascending), vec![e[2], e[1], e[0]]);

    let by_name = Query::new(["name"]).order_by("name", Direction::Desc);
    assert_eq!(s.select(&by_name), vec![e[3], e[0], e[1], e[2]]);
}

#[test]
fn resources_never_match_entity_queries() {
    let (store, _) = populated();
    let s = store.store();
    assert!(s.select(&Query::new(["round"])).is_empty());
    assert_eq!(s.resource_get("round"), Some(Value::Int(0)));
    assert_eq!(s.len(), 4);
}

#[test]
fn filter_on_missing_component_excludes_the_archetype() {
    let (store, e) = populated();
    let query = Query::new(["name"]).filter("hp", Comparison::Le, 100);
    assert_eq!(store.store().select(&query), vec![e[0], e[1], e[2]]);
}
