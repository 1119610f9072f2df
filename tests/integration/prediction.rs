//! Predicted moves reconciled against late confirmations.

use std::cell::RefCell;
use std::rc::Rc;

use strata::database::{Replication, TransactionEnvelope};
use strata::foundation::{Type, values};
use strata::observe::ObservedStore;
use strata::storage::{ComponentSchema, Comparison, Query, StoreSchema};
use strata::{Database, DatabaseConfig, Entity, Error, ErrorKind, Plugin, Value};

fn game() -> Database {
    let plugin = Plugin::builder()
        .component("x", ComponentSchema::new(Type::Int).with_default(0))
        .component("owner", ComponentSchema::new(Type::String))
        .transaction_insert("spawn", |tx, args| {
            tx.insert(values! { "x" => 0, "owner" => args.clone() })
        })
        .transaction_void("move", |tx, args| {
            let (Some(unit), Some(dx)) = (
                args.field("unit").and_then(Value::as_entity),
                args.field("dx").and_then(Value::as_int),
            ) else {
                return Err(Error::transaction("move takes a unit and dx"));
            };
            let x = tx
                .get(unit, "x")
                .and_then(|x| x.as_int())
                .ok_or_else(|| Error::entity_not_found(unit))?;
            tx.set(unit, "x", x + dx)
        })
        .build()
        .unwrap();
    Database::new(&plugin, DatabaseConfig::deterministic()).unwrap()
}

fn step(unit: Entity, dx: i64) -> Value {
    Value::map([("unit", Value::Entity(unit)), ("dx", Value::Int(dx))])
}

fn predict(db: &Database, id: u64, unit: Entity, dx: i64, time: i64) {
    db.apply(TransactionEnvelope::new(id, "move", step(unit, dx), -time)).unwrap();
}

fn confirm(db: &Database, id: u64, unit: Entity, dx: i64, time: i64) {
    db.apply(TransactionEnvelope::new(id, "move", step(unit, dx), time)).unwrap();
}

fn x(db: &Database, unit: Entity) -> Option<i64> {
    db.read(|store| store.get(unit, "x")).and_then(|x| x.as_int())
}

#[test]
fn late_confirmation_is_seen_once_by_observers() {
    let db = game();
    let unit = db.transact("spawn", "red").unwrap().as_entity().unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let _subscription = db.observe_entity(unit).subscribe(move |row| {
        let x = row.as_ref().and_then(|row| row.get("x")).and_then(Value::as_int);
        sink.borrow_mut().push(x);
    });

    predict(&db, 10, unit, 1, 5);
    predict(&db, 11, unit, 1, 6);
    // The server grants a longer first move.
    confirm(&db, 10, unit, 3, 5);
    confirm(&db, 11, unit, 2, 6);

    assert_eq!(x(&db, unit), Some(5));
    assert_eq!(db.pending_transients(), 0);
    // Rollback and replay inside one apply reach observers as a single change.
    assert_eq!(*seen.borrow(), vec![Some(0), Some(1), Some(2), Some(4), Some(5)]);
}

#[test]
fn predictions_converge_on_the_confirmed_history() {
    let predicted = game();
    let unit = predicted.transact("spawn", "blue").unwrap().as_entity().unwrap();
    predict(&predicted, 20, unit, 5, 30);
    predict(&predicted, 21, unit, -2, 10);
    predict(&predicted, 22, unit, 4, 20);
    confirm(&predicted, 21, unit, -2, 10);
    confirm(&predicted, 22, unit, 1, 20);
    predicted.cancel(20).unwrap();

    let direct = game();
    let unit_direct = direct.transact("spawn", "blue").unwrap().as_entity().unwrap();
    confirm(&direct, 21, unit_direct, -2, 10);
    confirm(&direct, 22, unit_direct, 1, 20);

    assert_eq!(unit, unit_direct);
    assert_eq!(x(&predicted, unit), x(&direct, unit_direct));
    assert_eq!(
        predicted.read(|store| store.read(unit)),
        direct.read(|store| store.read(unit_direct))
    );
}

#[test]
fn query_membership_follows_predictions() {
    let db = game();
    let unit = db.transact("spawn", "green").unwrap().as_entity().unwrap();
    let query = Query::new(["x"]).filter("x", Comparison::Ge, 3);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let _subscription = db.observe_select(query).subscribe(move |units: &Vec<Entity>| {
        sink.borrow_mut().push(units.clone());
    });

    predict(&db, 30, unit, 4, 2);
    db.cancel(30).unwrap();
    assert_eq!(*seen.borrow(), vec![vec![], vec![unit], vec![]]);
}

#[test]
fn rejected_prediction_leaves_the_rest_in_place() {
    let db = game();
    let unit = db.transact("spawn", "red").unwrap().as_entity().unwrap();
    predict(&db, 40, unit, 2, 3);

    let ghost = Entity::new(999);
    let err = db
        .apply(TransactionEnvelope::new(41, "move", step(ghost, 1), -4))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::EntityNotFound(_)));
    assert_eq!(x(&db, unit), Some(2));
    assert_eq!(db.pending_transients(), 1);
}

#[test]
fn replica_follows_predictions_and_rollbacks() {
    let db = game();
    let unit = db.transact("spawn", "red").unwrap().as_entity().unwrap();
    let schema = StoreSchema::new()
        .with_component("x", ComponentSchema::new(Type::Int).with_default(0))
        .unwrap()
        .with_component("owner", ComponentSchema::new(Type::String))
        .unwrap();
    let view = ObservedStore::from_schema(schema).unwrap();
    let replication = Replication::start(&db, &view).unwrap();
    let replica = replication.target_of(unit).unwrap();
    let view_x = || view.read(|store| store.get(replica, "x")).and_then(|x| x.as_int());

    predict(&db, 50, unit, 4, 2);
    assert_eq!(view_x(), Some(4));
    confirm(&db, 51, unit, 1, 1);
    assert_eq!(view_x(), Some(5));
    db.cancel(50).unwrap();
    assert_eq!(view_x(), Some(1));
    assert!(replication.take_failures().is_empty());
}
