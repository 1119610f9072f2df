//! Integration tests for async transaction sources
//!
//! Tests futures and channels feeding named transactions, and how streamed
//! provisional values interleave with confirmed writes.

use std::cell::RefCell;
use std::rc::Rc;

use strata_database::{Clock, Database, DatabaseConfig, ManualClock, Plugin};
use strata_foundation::{Error, ErrorKind, Result, Type, Value};
use strata_storage::ComponentSchema;
use tokio::sync::mpsc;
use tokio::task::{LocalSet, spawn_local, yield_now};

fn logging_db(clock: &ManualClock) -> Database {
    let plugin = Plugin::builder()
        .resource(
            "log",
            ComponentSchema::new(Type::vec(Type::Int)).with_default(Value::from(Vec::<i64>::new())),
        )
        .transaction_void("append", |tx, args| {
            let log = tx.resource_get("log").unwrap_or_else(|| Value::from(Vec::<i64>::new()));
            let (Some(items), Some(_)) = (log.as_vec(), args.as_int()) else {
                return Err(Error::transaction("append takes an int"));
            };
            tx.set_resource("log", Value::Vec(items.push_back(args.clone())))
        })
        .build()
        .unwrap();
    let config = DatabaseConfig::new().with_clock(Clock::Manual(clock.clone()));
    Database::new(&plugin, config).unwrap()
}

fn log(db: &Database) -> Vec<i64> {
    db.resource("log")
        .and_then(|log| log.as_vec().map(|items| items.iter().filter_map(Value::as_int).collect()))
        .unwrap_or_default()
}

#[tokio::test]
async fn async_source_with_unknown_transaction_fails() {
    let db = logging_db(&ManualClock::new(5));
    let err = db
        .transact_async("prepend", async { Ok(Value::Int(1)) })
        .await
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownTransaction(_)));
    assert!(log(&db).is_empty());
}

#[tokio::test]
async fn sequential_async_sources_commit_in_order() {
    let db = logging_db(&ManualClock::new(5));
    for value in [3, 1, 2] {
        db.transact_async("append", async move { Ok(Value::Int(value)) })
            .await
            .unwrap();
    }
    assert_eq!(log(&db), vec![3, 1, 2]);
}

#[tokio::test]
async fn empty_stream_commits_nothing() {
    let db = logging_db(&ManualClock::new(5));
    let seen = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&seen);
    let _subscription = db
        .observe_transactions()
        .subscribe(move |_| *sink.borrow_mut() += 1);
    let (tx, rx) = mpsc::channel::<Result<Value>>(1);
    drop(tx);

    assert_eq!(db.transact_stream("append", rx).await.unwrap(), Value::Nil);
    assert!(log(&db).is_empty());
    assert_eq!(db.pending_transients(), 0);
    assert!(db.to_data().unwrap().applied.is_empty());
    assert_eq!(*seen.borrow(), 0);
}

#[tokio::test]
async fn stream_commit_moves_behind_later_confirmed_writes() {
    let clock = ManualClock::new(10);
    let db = logging_db(&clock);
    let (tx, rx) = mpsc::channel(4);
    tx.send(Ok(Value::Int(1))).await.unwrap();

    LocalSet::new()
        .run_until(async {
            let stream_db = db.clone();
            let stream = spawn_local(async move { stream_db.transact_stream("append", rx).await });
            while db.pending_transients() == 0 {
                yield_now().await;
            }

            // A confirmed write lands after the provisional value.
            clock.set(20);
            db.transact("append", 2).unwrap();
            assert_eq!(log(&db), vec![1, 2]);

            // Closing commits at a later time, after the confirmed write.
            clock.set(30);
            drop(tx);
            stream.await.unwrap().unwrap();
        })
        .await;

    assert_eq!(log(&db), vec![2, 1]);
    assert_eq!(db.pending_transients(), 0);
}

#[tokio::test]
async fn stream_updates_replace_the_provisional_value() {
    let db = logging_db(&ManualClock::new(10));
    let (tx, rx) = mpsc::channel(4);
    let observed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&observed);
    let _subscription = db.observe_resource("log").subscribe(move |value| {
        sink.borrow_mut().push(value.clone());
    });

    LocalSet::new()
        .run_until(async {
            let stream_db = db.clone();
            let stream = spawn_local(async move { stream_db.transact_stream("append", rx).await });
            for value in [4, 5, 6] {
                tx.send(Ok(Value::Int(value))).await.unwrap();
                while log(&db) != vec![value] {
                    yield_now().await;
                }
            }
            drop(tx);
            assert_eq!(stream.await.unwrap().unwrap(), Value::Nil);
        })
        .await;

    assert_eq!(log(&db), vec![6]);
    // The initial replay, then one notification per provisional value.
    // The commit leaves the log unchanged and is deduplicated.
    assert_eq!(observed.borrow().len(), 4);
}
