//! Integration tests for the reconciling ledger
//!
//! Tests ordering by time, supersession, cancellation, and snapshots that
//! exclude provisional entries.

use proptest::prelude::*;
use strata_database::{Database, DatabaseConfig, Plugin, TransactionEnvelope};
use strata_foundation::{Error, Type, Value};
use strata_storage::ComponentSchema;

/// A database whose `append` transaction pushes its argument onto a log.
fn logging_db() -> Database {
    let plugin = Plugin::builder()
        .resource(
            "log",
            ComponentSchema::new(Type::vec(Type::Int)).with_default(Value::from(Vec::<i64>::new())),
        )
        .transaction_void("append", |tx, args| {
            let log = tx.resource_get("log").unwrap_or_else(|| Value::from(Vec::<i64>::new()));
            let Some(items) = log.as_vec() else {
                return Err(Error::transaction("log is not a vec"));
            };
            tx.set_resource("log", Value::Vec(items.push_back(args.clone())))
        })
        .build()
        .unwrap();
    Database::new(&plugin, DatabaseConfig::deterministic()).unwrap()
}

fn log(db: &Database) -> Vec<i64> {
    db.resource("log")
        .and_then(|log| log.as_vec().map(|items| items.iter().filter_map(Value::as_int).collect()))
        .unwrap_or_default()
}

fn predict(db: &Database, id: u64, value: i64, time: i64) {
    db.apply(TransactionEnvelope::new(id, "append", value, -time)).unwrap();
}

#[test]
fn provisional_entries_replay_in_time_order() {
    let db = logging_db();
    predict(&db, 1, 30, 30);
    predict(&db, 2, 10, 10);
    predict(&db, 3, 20, 20);
    assert_eq!(log(&db), vec![10, 20, 30]);
    assert_eq!(db.pending_transients(), 3);
}

#[test]
fn equal_times_break_ties_by_id() {
    let db = logging_db();
    predict(&db, 9, 2, 5);
    predict(&db, 4, 1, 5);
    assert_eq!(log(&db), vec![1, 2]);
}

#[test]
fn confirmation_supersedes_the_prediction() {
    let db = logging_db();
    predict(&db, 1, 100, 10);
    predict(&db, 2, 200, 20);

    db.apply(TransactionEnvelope::new(1, "append", 111, 10)).unwrap();
    assert_eq!(log(&db), vec![111, 200]);
    assert_eq!(db.pending_transients(), 1);
}

#[test]
fn cancellation_removes_only_that_entry() {
    let db = logging_db();
    predict(&db, 1, 1, 10);
    predict(&db, 2, 2, 20);
    predict(&db, 3, 3, 30);

    db.apply(TransactionEnvelope::cancel(2, "append")).unwrap();
    assert_eq!(log(&db), vec![1, 3]);
    db.cancel(99).unwrap();
    assert_eq!(log(&db), vec![1, 3]);
}

#[test]
fn snapshot_round_trip_keeps_confirmed_and_provisional_apart() {
    let db = logging_db();
    db.transact("append", 1).unwrap();
    predict(&db, 50, 2, 40);
    let data = db.to_data().unwrap();
    assert_eq!(data.applied.len(), 1);
    assert_eq!(log(&db), vec![1, 2]);

    let restored = logging_db();
    restored.from_data(&data).unwrap();
    assert_eq!(log(&restored), vec![1, 2]);

    restored.cancel(50).unwrap();
    assert_eq!(log(&restored), vec![1]);
}

#[test]
fn unknown_transaction_is_rejected_before_anything_runs() {
    let db = logging_db();
    predict(&db, 1, 1, 10);
    let err = db
        .apply(TransactionEnvelope::new(2, "missing", Value::Nil, -5))
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(log(&db), vec![1]);
}

proptest! {
    #[test]
    fn arrival_order_does_not_change_the_outcome(
        (times, order) in prop::collection::vec(1i64..50, 1..8).prop_flat_map(|times| {
            let n = times.len();
            (Just(times), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        })
    ) {
        let db = logging_db();
        for &index in &order {
            let id = index as u64 + 1;
            predict(&db, id, index as i64, times[index]);
        }

        let mut expected: Vec<usize> = (0..times.len()).collect();
        expected.sort_by_key(|&index| (times[index], index));
        let expected: Vec<i64> = expected.into_iter().map(|index| index as i64).collect();
        prop_assert_eq!(log(&db), expected);
    }
}
