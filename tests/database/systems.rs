//! Integration tests for system scheduling
//!
//! Tests tier computation through a database and asynchronous tier execution.

use std::cell::RefCell;
use std::rc::Rc;

use strata_database::{Database, DatabaseConfig, LocalFuture, Plugin, Schedule, SystemDecl, SystemFn};
use strata_foundation::{Error, ErrorKind, Name};

type Log = Rc<RefCell<Vec<String>>>;

fn logging(log: &Log, name: &'static str) -> SystemDecl {
    let log = Rc::clone(log);
    SystemDecl::from_fn(move |_| log.borrow_mut().push(name.to_string()))
}

fn names(tiers: &[Vec<Name>]) -> Vec<Vec<&str>> {
    tiers.iter().map(|tier| tier.iter().map(|n| &**n).collect()).collect()
}

#[test]
fn database_exposes_the_tiers() {
    let log = Log::default();
    let plugin = Plugin::builder()
        .system("render", logging(&log, "render").with_schedule(Schedule::new().after("physics")))
        .system("physics", logging(&log, "physics").with_schedule(Schedule::new().after("input")))
        .system("input", logging(&log, "input"))
        .system("audio", logging(&log, "audio").with_schedule(Schedule::new().during("physics")))
        .build()
        .unwrap();
    let db = Database::new(&plugin, DatabaseConfig::deterministic()).unwrap();
    assert_eq!(
        names(&db.system_order()),
        vec![vec!["input"], vec!["audio", "physics"], vec!["render"]]
    );
}

#[test]
fn cyclic_systems_fail_database_construction() {
    let log = Log::default();
    let plugin = Plugin::builder()
        .system("a", logging(&log, "a").with_schedule(Schedule::new().before("b")))
        .system("b", logging(&log, "b").with_schedule(Schedule::new().before("a")))
        .build()
        .unwrap();
    let err = Database::new(&plugin, DatabaseConfig::deterministic()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::CircularDependency));
}

#[test]
fn create_runs_once_per_system() {
    let created = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&created);
    let plugin = Plugin::builder()
        .system(
            "lazy",
            SystemDecl::new(move |_| {
                *counter.borrow_mut() += 1;
                None
            }),
        )
        .build()
        .unwrap();
    let db = Database::new(&plugin, DatabaseConfig::deterministic()).unwrap();
    assert_eq!(*created.borrow(), 1);
    assert_eq!(names(&db.system_order()), vec![vec!["lazy"]]);
}

#[tokio::test]
async fn suspended_systems_finish_before_the_next_tier() {
    let log = Log::default();
    let slow_log = Rc::clone(&log);
    let slow = SystemDecl::new(move |_| {
        let log = Rc::clone(&slow_log);
        let run: SystemFn = Rc::new(move |_: &Database| -> Option<LocalFuture> {
            let log = Rc::clone(&log);
            Some(Box::pin(async move {
                log.borrow_mut().push("slow:start".to_string());
                tokio::task::yield_now().await;
                log.borrow_mut().push("slow:end".to_string());
                Ok(())
            }))
        });
        Some(run)
    });
    let plugin = Plugin::builder()
        .system("fast", logging(&log, "fast"))
        .system("later", logging(&log, "later").with_schedule(Schedule::new().after("slow")))
        .system("slow", slow)
        .build()
        .unwrap();
    let db = Database::new(&plugin, DatabaseConfig::deterministic()).unwrap();

    db.run_systems().await.unwrap();
    let log = log.borrow();
    let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
    assert!(position("slow:end") < position("later"));
    assert!(position("fast") < position("later"));
}

#[tokio::test]
async fn failing_system_reports_after_its_tier() {
    let log = Log::default();
    let failing = SystemDecl::new(|_| {
        let run: SystemFn = Rc::new(|_: &Database| -> Option<LocalFuture> {
            Some(Box::pin(async { Err(Error::transaction("out of fuel")) }))
        });
        Some(run)
    });
    let plugin = Plugin::builder()
        .system("broken", failing)
        .system("sibling", logging(&log, "sibling"))
        .system("next", logging(&log, "next").with_schedule(Schedule::new().after("broken")))
        .build()
        .unwrap();
    let db = Database::new(&plugin, DatabaseConfig::deterministic()).unwrap();

    let err = db.run_systems().await.unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Transaction(_)));
    assert_eq!(*log.borrow(), vec!["sibling".to_string()]);
}
