//! Integration tests for plugins
//!
//! Tests section order, schema merging, and runtime extension.

use strata_database::{ActionOutcome, Database, DatabaseConfig, Plugin};
use strata_foundation::{ErrorKind, Type, Value, values};
use strata_storage::ComponentSchema;

fn base() -> Plugin {
    Plugin::builder()
        .component("name", ComponentSchema::new(Type::String))
        .archetype("person", ["name"])
        .transaction_insert("person", |tx, args| {
            tx.insert_into("person", values! { "name" => args.clone() })
        })
        .build()
        .unwrap()
}

#[test]
fn composed_plugins_share_schema_and_transactions() {
    let inventory = Plugin::builder()
        .extends(&base())
        .component("gold", ComponentSchema::new(Type::Int).with_default(0))
        .transaction_void("pay", |tx, args| {
            let Some(entity) = args.as_entity() else {
                return Err(strata_foundation::Error::transaction("pay needs an entity"));
            };
            let gold = tx.get(entity, "gold").and_then(|v| v.as_int()).unwrap_or(0);
            tx.set(entity, "gold", gold + 5)
        })
        .build()
        .unwrap();

    let db = Database::new(&inventory, DatabaseConfig::deterministic()).unwrap();
    let ada = db.transact("person", "ada").unwrap();
    db.transact("pay", ada.clone()).unwrap();
    db.transact("pay", ada.clone()).unwrap();
    let ada = ada.as_entity().unwrap();
    assert_eq!(db.read(|s| s.get(ada, "gold")), Some(Value::Int(10)));
    assert_eq!(db.read(|s| s.get(ada, "name")), Some(Value::from("ada")));
}

#[test]
fn sections_out_of_order_fail_to_build() {
    let err = Plugin::builder()
        .transaction_void("noop", |_, _| Ok(()))
        .component("late", ComponentSchema::new(Type::Int))
        .build()
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::PluginOrder { section: "components", after: "transactions" }));
}

#[test]
fn diamond_extension_deduplicates_shared_base() {
    let left = Plugin::builder().extends(&base()).build().unwrap();
    let right = Plugin::builder().extends(&base()).build().unwrap();
    let both = Plugin::builder().extends(&left).extends(&right).build().unwrap();
    assert_eq!(both.schema().components.len(), 1);
    assert_eq!(both.transaction_names().count(), 1);
}

#[test]
fn conflicting_components_fail_to_merge() {
    let other = Plugin::builder()
        .component("name", ComponentSchema::new(Type::Int))
        .build()
        .unwrap();
    let err = Plugin::builder().extends(&base()).extends(&other).build().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SchemaConflict { category: "component", .. }));
}

#[test]
fn runtime_extension_adds_actions() {
    let db = Database::new(&base(), DatabaseConfig::deterministic()).unwrap();
    let extra = Plugin::builder()
        .action("count", |db, _| {
            let people = db.read(|s| s.len());
            Ok(ActionOutcome::Completed(Value::Int(i64::try_from(people).unwrap_or(i64::MAX))))
        })
        .action("refuse", |_, _| Ok(ActionOutcome::failed("not now")))
        .build()
        .unwrap();
    db.extend(&extra).unwrap();

    db.transact("person", "bo").unwrap();
    assert_eq!(db.act("count", Value::Nil).unwrap(), ActionOutcome::Completed(Value::Int(1)));
    assert_eq!(db.act("refuse", Value::Nil).unwrap(), ActionOutcome::failed("not now"));
}
