//! Sessions saved to bytes and restored into a fresh database.

use strata::database::{DatabaseData, TransactionEnvelope};
use strata::foundation::{Type, values};
use strata::storage::{ComponentSchema, Direction, Query};
use strata::{Database, DatabaseConfig, Entity, Plugin, Value};

fn board() -> Database {
    let plugin = Plugin::builder()
        .component("title", ComponentSchema::new(Type::String))
        .component("rank", ComponentSchema::new(Type::Int).with_default(0))
        .component("focused", ComponentSchema::new(Type::Bool).with_default(false).transient())
        .resource("cards", ComponentSchema::new(Type::Int).with_default(0))
        .archetype("card", ["title", "rank", "focused"])
        .transaction_insert("add_card", |tx, args| {
            let cards = tx.resource_get("cards").and_then(|v| v.as_int()).unwrap_or(0);
            tx.set_resource("cards", cards + 1)?;
            tx.insert_into("card", values! { "title" => args.clone(), "rank" => cards })
        })
        .transaction_void("focus", |tx, args| {
            let card = args
                .as_entity()
                .ok_or_else(|| strata::Error::transaction("focus takes a card"))?;
            tx.set(card, "focused", true)
        })
        .build()
        .unwrap();
    Database::new(&plugin, DatabaseConfig::deterministic()).unwrap()
}

fn titles(db: &Database) -> Vec<Value> {
    let query = Query::new(["title", "rank"]).order_by("rank", Direction::Asc);
    db.read(|store| {
        store
            .select(&query)
            .into_iter()
            .filter_map(|card| store.get(card, "title"))
            .collect()
    })
}

fn save(db: &Database) -> Vec<u8> {
    db.to_data().unwrap().to_bytes().unwrap()
}

fn restore(bytes: &[u8]) -> Database {
    let db = board();
    db.from_data(&DatabaseData::from_bytes(bytes).unwrap()).unwrap();
    db
}

#[test]
fn pending_predictions_survive_a_restart() {
    let db = board();
    db.transact("add_card", "write docs").unwrap();
    db.apply(TransactionEnvelope::new(500, "add_card", "ship it", -20)).unwrap();

    let restored = restore(&save(&db));
    assert_eq!(titles(&restored), titles(&db));
    assert_eq!(restored.pending_transients(), 1);
    assert_eq!(restored.resource("cards"), Some(Value::Int(2)));

    // The restored prediction can still be confirmed or cancelled.
    restored.cancel(500).unwrap();
    assert_eq!(titles(&restored), vec![Value::from("write docs")]);
    assert_eq!(restored.resource("cards"), Some(Value::Int(1)));
}

#[test]
fn snapshot_store_excludes_predictions() {
    let db = board();
    db.transact("add_card", "confirmed").unwrap();
    db.apply(TransactionEnvelope::new(600, "add_card", "predicted", -20)).unwrap();

    let data = db.to_data().unwrap();
    assert_eq!(data.applied.len(), 1);
    assert_eq!(data.applied[0].id, 600);
    // Taking the snapshot leaves the live prediction in place.
    assert_eq!(titles(&db), vec![Value::from("confirmed"), Value::from("predicted")]);
    assert_eq!(db.pending_transients(), 1);
}

#[test]
fn restored_ids_continue_after_the_ledger() {
    let db = board();
    db.apply(TransactionEnvelope::new(77, "add_card", "late", -30)).unwrap();
    let restored = restore(&save(&db));
    assert!(restored.next_transaction_id() > 77);
}

#[test]
fn transient_focus_is_not_persisted() {
    let db = board();
    let card: Entity = db.transact("add_card", "focus me").unwrap().as_entity().unwrap();
    db.transact("focus", card).unwrap();
    assert_eq!(db.read(|store| store.get(card, "focused")), Some(Value::Bool(true)));

    let restored = restore(&save(&db));
    assert_eq!(restored.read(|store| store.get(card, "focused")), Some(Value::Bool(false)));
    assert_eq!(restored.read(|store| store.get(card, "title")), Some(Value::from("focus me")));
}
