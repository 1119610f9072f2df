//! System declarations.
//!
//! A system is created once, when its plugin is added to a database, and may
//! return a function that runs on every [`Database::run_systems`] call. A run
//! either does its work synchronously and returns `None`, or returns a local
//! future that the database drives alongside the rest of its tier.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use strata_foundation::Result;

use crate::database::Database;
use crate::scheduler::Schedule;

/// A pending asynchronous system run.
pub type LocalFuture = Pin<Box<dyn Future<Output = Result<()>>>>;

/// One run of a system.
pub type SystemFn = Rc<dyn Fn(&Database) -> Option<LocalFuture>>;

/// Creates a system's run function.
pub type CreateSystem = Rc<dyn Fn(&Database) -> Option<SystemFn>>;

/// A declared system: its constructor and scheduling constraints.
#[derive(Clone)]
pub struct SystemDecl {
    /// Called once when the system is added.
    pub create: CreateSystem,
    /// Ordering constraints.
    pub schedule: Schedule,
}

impl SystemDecl {
    /// Declares a system.
    pub fn new(create: impl Fn(&Database) -> Option<SystemFn> + 'static) -> Self {
        Self {
            create: Rc::new(create),
            schedule: Schedule::new(),
        }
    }

    /// Declares a system whose every run is the same synchronous function.
    pub fn from_fn(run: impl Fn(&Database) + 'static) -> Self {
        let run: SystemFn = Rc::new(move |db: &Database| -> Option<LocalFuture> {
            run(db);
            None
        });
        Self::new(move |_| Some(Rc::clone(&run)))
    }

    /// Sets the scheduling constraints.
    #[must_use]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }
}

impl fmt::Debug for SystemDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDecl")
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}
