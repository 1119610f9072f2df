//! An editor loop: user edits with undo history, systems that derive state.

use std::rc::Rc;

use strata::database::{ActionOutcome, LocalFuture, Schedule, SystemDecl, UndoRedoService};
use strata::foundation::{Type, values};
use strata::storage::{ComponentSchema, Query, Undoable};
use strata::{Database, DatabaseConfig, Entity, Error, Plugin, Value};

fn document() -> Plugin {
    Plugin::builder()
        .component("text", ComponentSchema::new(Type::String))
        .component("length", ComponentSchema::new(Type::Int).with_default(0))
        .archetype("doc", ["text", "length"])
        .transaction_insert("new_doc", |tx, _| {
            tx.set_undoable(Some(Undoable::new()));
            tx.insert_into("doc", values! { "text" => "" })
        })
        .transaction_void("type_text", |tx, args| {
            let (Some(doc), Some(text)) = (
                args.field("doc").and_then(Value::as_entity),
                args.field("text").and_then(Value::as_str),
            ) else {
                return Err(Error::transaction("type_text takes a doc and text"));
            };
            tx.set_undoable(Some(Undoable::coalescing("typing")));
            tx.set(doc, "text", text)
        })
        .build()
        .unwrap()
}

fn editor() -> Database {
    let plugin = Plugin::builder()
        .extends(&document())
        .resource("words", ComponentSchema::new(Type::Int).with_default(0))
        .resource("saves", ComponentSchema::new(Type::Int).with_default(0))
        .transaction_void("measure", |tx, _| {
            let mut words = 0;
            for doc in tx.select(&Query::new(["text"])) {
                let text = tx.get(doc, "text").unwrap_or(Value::Nil);
                let text = text.as_str().unwrap_or_default();
                words += text.split_whitespace().count() as i64;
                tx.set(doc, "length", text.chars().count() as i64)?;
            }
            tx.set_resource("words", words)
        })
        .transaction_void("save", |tx, _| {
            let saves = tx.resource_get("saves").and_then(|v| v.as_int()).unwrap_or(0);
            tx.set_resource("saves", saves + 1)
        })
        .action("publish", |db, _| {
            if db.resource("words").and_then(|v| v.as_int()).unwrap_or(0) == 0 {
                return Ok(ActionOutcome::failed("nothing to publish"));
            }
            Ok(ActionOutcome::Completed(db.resource("words").unwrap_or(Value::Nil)))
        })
        .system(
            "measure",
            SystemDecl::from_fn(|db| {
                db.transact("measure", Value::Nil).unwrap();
            }),
        )
        .system(
            "autosave",
            SystemDecl::new(|_| {
                Some(Rc::new(|db: &Database| -> Option<LocalFuture> {
                    let db = db.clone();
                    Some(Box::pin(async move {
                        db.transact_async("save", async { Ok(Value::Nil) }).await.map(|_| ())
                    }))
                }))
            })
            .with_schedule(Schedule::new().after("measure")),
        )
        .build()
        .unwrap();
    Database::new(&plugin, DatabaseConfig::deterministic()).unwrap()
}

fn type_text(db: &Database, doc: Entity, text: &str) {
    db.transact("type_text", Value::map([("doc", Value::Entity(doc)), ("text", Value::from(text))]))
        .unwrap();
}

#[tokio::test]
async fn systems_derive_state_from_undoable_edits() {
    let db = editor();
    let history = UndoRedoService::new(&db);
    let doc = db.transact("new_doc", Value::Nil).unwrap().as_entity().unwrap();
    type_text(&db, doc, "hello");
    type_text(&db, doc, "hello world");
    assert_eq!(history.len(), 2);

    db.run_systems().await.unwrap();
    assert_eq!(db.resource("words"), Some(Value::Int(2)));
    assert_eq!(db.read(|store| store.get(doc, "length")), Some(Value::Int(11)));
    assert_eq!(db.resource("saves"), Some(Value::Int(1)));

    // Derived writes are not undoable, so undo reverts only the typing.
    assert!(history.undo().unwrap());
    assert_eq!(db.read(|store| store.get(doc, "text")), Some(Value::from("")));
    db.run_systems().await.unwrap();
    assert_eq!(db.resource("words"), Some(Value::Int(0)));
    assert_eq!(db.resource("saves"), Some(Value::Int(2)));

    assert!(history.can_redo());
    assert!(history.redo().unwrap());
    assert_eq!(db.read(|store| store.get(doc, "text")), Some(Value::from("hello world")));
}

#[tokio::test]
async fn actions_see_system_output() {
    let db = editor();
    assert_eq!(db.act("publish", Value::Nil).unwrap(), ActionOutcome::failed("nothing to publish"));

    let doc = db.transact("new_doc", Value::Nil).unwrap().as_entity().unwrap();
    type_text(&db, doc, "one two three");
    db.run_systems().await.unwrap();
    assert_eq!(db.act("publish", Value::Nil).unwrap(), ActionOutcome::Completed(Value::Int(3)));
}

#[test]
fn extended_plugin_orders_its_systems() {
    let db = editor();
    let order: Vec<Vec<String>> = db
        .system_order()
        .iter()
        .map(|tier| tier.iter().map(ToString::to_string).collect())
        .collect();
    assert_eq!(order, vec![vec!["measure".to_string()], vec!["autosave".to_string()]]);
}
