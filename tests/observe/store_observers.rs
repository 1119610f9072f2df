//! Integration tests for store observers
//!
//! Tests incremental query observation, deduplication, batching, and
//! observer release.

use std::cell::RefCell;
use std::rc::Rc;

use strata_foundation::{Entity, Type, Value, Values, values};
use strata_observe::{Observable, ObservedStore, Subscription};
use strata_storage::{ComponentSchema, Comparison, ExecuteOptions, Query, StoreSchema};

fn observed() -> ObservedStore {
    let schema = StoreSchema::new()
        .with_component("position", ComponentSchema::new(Type::Float))
        .and_then(|s| s.with_component("velocity", ComponentSchema::new(Type::Float)))
        .and_then(|s| s.with_component("color", ComponentSchema::new(Type::String)))
        .and_then(|s| s.with_resource("paused", ComponentSchema::new(Type::Bool).with_default(false)))
        .unwrap();
    ObservedStore::from_schema(schema).unwrap()
}

fn insert(store: &ObservedStore, values: Values) -> Entity {
    store
        .execute(ExecuteOptions::new(), |tx| tx.insert(values))
        .unwrap()
        .value
}

fn record<T: Clone + 'static>(observable: &Observable<T>) -> (Rc<RefCell<Vec<T>>>, Subscription) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let subscription = observable.subscribe(move |value: &T| sink.borrow_mut().push(value.clone()));
    (seen, subscription)
}

// =============================================================================
// Query Observers
// =============================================================================

#[test]
fn unrelated_writes_do_not_notify_queries() {
    let store = observed();
    let moving = insert(&store, values! { "position" => 0.0, "velocity" => 1.0 });
    let painted = insert(&store, values! { "color" => "red" });
    let (seen, _sub) = record(&store.select(Query::new(["position", "velocity"])));

    for shade in ["green", "blue", "grey"] {
        store
            .execute(ExecuteOptions::new(), |tx| tx.set(painted, "color", shade))
            .unwrap();
    }
    assert_eq!(*seen.borrow(), vec![vec![moving]]);
}

#[test]
fn filtered_query_tracks_threshold_crossings() {
    let store = observed();
    let e = insert(&store, values! { "position" => 0.0 });
    let query = Query::new(["position"]).filter("position", Comparison::Ge, 10.0);
    let (seen, _sub) = record(&store.select(query));

    for x in [5.0, 12.0, 15.0, 3.0] {
        store
            .execute(ExecuteOptions::new(), |tx| tx.set(e, "position", x))
            .unwrap();
    }
    assert_eq!(*seen.borrow(), vec![vec![], vec![e], vec![]]);
}

#[test]
fn deep_select_reports_included_values() {
    let store = observed();
    let e = insert(&store, values! { "position" => 1.0, "color" => "red" });
    let (seen, _sub) = record(&store.select_deep(Query::new(["position"])));

    store
        .execute(ExecuteOptions::new(), |tx| tx.set(e, "position", 2.0))
        .unwrap();
    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    let (entity, row) = &seen[1][0];
    assert_eq!(*entity, e);
    assert_eq!(row.get("position"), Some(&Value::Float(2.0)));
    assert!(!row.contains_key("color"));
}

// =============================================================================
// Value Observers
// =============================================================================

#[test]
fn resource_observer_skips_equal_values() {
    let store = observed();
    let (seen, _sub) = record(&store.resource("paused"));
    for paused in [true, true, false, false, true] {
        store
            .execute(ExecuteOptions::new(), |tx| tx.set_resource("paused", paused))
            .unwrap();
    }
    let values: Vec<Option<Value>> = seen.borrow().clone();
    assert_eq!(
        values,
        vec![
            Some(Value::Bool(false)),
            Some(Value::Bool(true)),
            Some(Value::Bool(false)),
            Some(Value::Bool(true)),
        ]
    );
}

#[test]
fn component_observer_fires_per_write() {
    let store = observed();
    let e = insert(&store, values! { "color" => "red" });
    let (seen, _sub) = record(&store.component("color"));
    store
        .execute(ExecuteOptions::new(), |tx| tx.set(e, "color", "blue"))
        .unwrap();
    insert(&store, values! { "position" => 1.0 });
    assert_eq!(seen.borrow().len(), 1);
}

// =============================================================================
// Batching and Release
// =============================================================================

#[test]
fn batch_delivers_last_value_once() {
    let store = observed();
    let e = insert(&store, values! { "position" => 0.0 });
    let (seen, _sub) = record(&store.entity(e));

    store.batch(|| {
        for x in 1..=10 {
            store
                .execute(ExecuteOptions::new(), |tx| tx.set(e, "position", f64::from(x)))
                .unwrap();
        }
    });

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[1].as_ref().and_then(|row| row.get("position").cloned()),
        Some(Value::Float(10.0))
    );
}

#[test]
fn manual_flush_holds_notifications() {
    let schema = StoreSchema::new()
        .with_component("position", ComponentSchema::new(Type::Float))
        .unwrap();
    let store = ObservedStore::with_auto_flush(
        strata_storage::TransactionalStore::from_schema(schema).unwrap(),
        false,
    );
    let (seen, _sub) = record(&store.select(Query::new(["position"])));
    let e = insert(&store, values! { "position" => 1.0 });
    assert_eq!(seen.borrow().len(), 1);

    store.flush();
    assert_eq!(*seen.borrow(), vec![vec![], vec![e]]);
}

#[test]
fn unsubscribing_releases_every_observer() {
    let store = observed();
    let e = insert(&store, values! { "position" => 0.0 });
    let subscriptions = vec![
        store.entity(e).subscribe(|_| {}),
        store.select(Query::new(["position"])).subscribe(|_| {}),
        store.select_deep(Query::new(["color"])).subscribe(|_| {}),
        store.resource("paused").subscribe(|_| {}),
        store.component("velocity").subscribe(|_| {}),
        store.transactions().subscribe(|_| {}),
    ];
    assert!(store.observer_count() > 0);

    drop(subscriptions);
    assert_eq!(store.observer_count(), 0);
}
