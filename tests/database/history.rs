//! Integration tests for undo/redo history
//!
//! Tests recording through named transactions, coalescing, and undo against
//! a store that moved on since the step was recorded.

use strata_database::{Database, DatabaseConfig, Plugin, TransactionEnvelope, UndoRedoService};
use strata_foundation::{Entity, Error, ErrorKind, Type, Value, values};
use strata_storage::{ComponentSchema, Undoable};

fn editor() -> Database {
    let plugin = Plugin::builder()
        .component("name", ComponentSchema::new(Type::String))
        .component("width", ComponentSchema::new(Type::Int).with_default(1))
        .transaction_insert("add_shape", |tx, args| {
            tx.set_undoable(Some(Undoable::new()));
            tx.insert(values! { "name" => args.clone(), "width" => 1 })
        })
        .transaction_void("rename", |tx, args| {
            let (Some(entity), Some(name)) = (
                args.field("entity").and_then(Value::as_entity),
                args.field("name").and_then(Value::as_str),
            ) else {
                return Err(Error::transaction("rename takes an entity and a name"));
            };
            tx.set_undoable(Some(Undoable::coalescing("rename")));
            tx.set(entity, "name", name)
        })
        .transaction_void("resize", |tx, args| {
            let (Some(entity), Some(width)) = (
                args.field("entity").and_then(Value::as_entity),
                args.field("width").and_then(Value::as_int),
            ) else {
                return Err(Error::transaction("resize takes an entity and a width"));
            };
            tx.set_undoable(Some(Undoable::coalescing("resize")));
            tx.set(entity, "width", width)
        })
        .transaction_void("erase", |tx, args| {
            let entity = args.as_entity().ok_or_else(|| Error::transaction("entity expected"))?;
            tx.delete(entity).map(|_| ())
        })
        .build()
        .unwrap();
    Database::new(&plugin, DatabaseConfig::deterministic()).unwrap()
}

fn add_shape(db: &Database, name: &str) -> Entity {
    db.transact("add_shape", name).unwrap().as_entity().unwrap()
}

fn rename(db: &Database, entity: Entity, name: &str) {
    db.transact("rename", Value::map([("entity", Value::Entity(entity)), ("name", Value::from(name))]))
        .unwrap();
}

fn resize(db: &Database, entity: Entity, width: i64) {
    db.transact("resize", Value::map([("entity", Value::Entity(entity)), ("width", Value::Int(width))]))
        .unwrap();
}

fn name(db: &Database, entity: Entity) -> Option<Value> {
    db.read(|store| store.get(entity, "name"))
}

fn width(db: &Database, entity: Entity) -> Option<Value> {
    db.read(|store| store.get(entity, "width"))
}

#[test]
fn different_coalesce_keys_stay_separate() {
    let db = editor();
    let history = UndoRedoService::new(&db);
    let shape = add_shape(&db, "box");
    rename(&db, shape, "crate");
    rename(&db, shape, "chest");
    resize(&db, shape, 4);
    resize(&db, shape, 8);
    assert_eq!(history.len(), 3);

    history.undo().unwrap();
    assert_eq!(width(&db, shape), Some(Value::Int(1)));
    assert_eq!(name(&db, shape), Some(Value::from("chest")));

    history.undo().unwrap();
    assert_eq!(name(&db, shape), Some(Value::from("box")));

    history.undo().unwrap();
    assert!(!db.read(|store| store.contains(shape)));
    assert!(!history.can_undo());
}

#[test]
fn interleaved_keys_do_not_coalesce() {
    let db = editor();
    let history = UndoRedoService::new(&db);
    let shape = add_shape(&db, "box");
    rename(&db, shape, "a");
    resize(&db, shape, 2);
    rename(&db, shape, "b");
    assert_eq!(history.len(), 4);

    history.undo().unwrap();
    assert_eq!(name(&db, shape), Some(Value::from("a")));
    assert_eq!(width(&db, shape), Some(Value::Int(2)));
}

#[test]
fn undo_applies_to_the_current_state() {
    let db = editor();
    let history = UndoRedoService::new(&db);
    let first = add_shape(&db, "first");
    let second = add_shape(&db, "second");
    rename(&db, first, "renamed");

    // The untracked erase of another entity is left alone by undo.
    db.transact("erase", second).unwrap();
    history.undo().unwrap();
    assert_eq!(name(&db, first), Some(Value::from("first")));
    assert!(!db.read(|store| store.contains(second)));
}

#[test]
fn stale_step_is_a_precondition_error() {
    let db = editor();
    let history = UndoRedoService::new(&db);
    let shape = add_shape(&db, "box");
    rename(&db, shape, "crate");
    db.transact("erase", shape).unwrap();

    let err = history.undo().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Precondition(_)));
    // The failed step stays in place.
    assert!(history.can_undo());
    assert!(!history.can_redo());
    assert!(!db.read(|store| store.contains(shape)));
}

#[test]
fn redo_restores_a_deleted_entity_under_its_id() {
    let db = editor();
    let history = UndoRedoService::new(&db);
    let shape = add_shape(&db, "box");
    history.undo().unwrap();
    history.redo().unwrap();
    assert_eq!(name(&db, shape), Some(Value::from("box")));
    assert_eq!(width(&db, shape), Some(Value::Int(1)));
}

#[test]
fn provisional_entries_are_not_recorded_until_confirmed() {
    let db = editor();
    let history = UndoRedoService::new(&db);
    db.apply(TransactionEnvelope::new(100, "add_shape", "ghost", -5)).unwrap();
    assert!(history.is_empty());

    db.apply(TransactionEnvelope::new(100, "add_shape", "ghost", 5)).unwrap();
    assert_eq!(history.len(), 1);
}

#[test]
fn clear_forgets_everything() {
    let db = editor();
    let history = UndoRedoService::new(&db);
    add_shape(&db, "a");
    add_shape(&db, "b");
    history.undo().unwrap();
    history.clear();
    assert!(history.is_empty());
    assert!(!history.can_undo());
    assert!(!history.can_redo());
}

#[test]
fn history_is_recorded_at_flush() {
    let plugin = Plugin::builder()
        .component("name", ComponentSchema::new(Type::String))
        .transaction_insert("add_shape", |tx, args| {
            tx.set_undoable(Some(Undoable::new()));
            tx.insert(values! { "name" => args.clone() })
        })
        .build()
        .unwrap();
    let db = Database::new(&plugin, DatabaseConfig::deterministic().with_auto_flush(false)).unwrap();
    let history = UndoRedoService::new(&db);

    db.transact("add_shape", "box").unwrap();
    assert!(history.is_empty());
    db.flush();
    assert_eq!(history.len(), 1);
}
