//! Database configuration.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use strata_storage::DEFAULT_CAPACITY;

/// Source of reconciliation timestamps, in milliseconds.
///
/// Timestamps are always at least 1: a time of zero is the cancellation
/// signal of the reconciling ledger.
#[derive(Clone, Debug, Default)]
pub enum Clock {
    /// Wall-clock milliseconds since the Unix epoch.
    #[default]
    System,
    /// A clock advanced by hand, for deterministic tests.
    Manual(ManualClock),
}

impl Clock {
    /// Returns the current time.
    #[must_use]
    pub fn now(&self) -> i64 {
        let now = match self {
            Self::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(1, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)),
            Self::Manual(clock) => clock.now(),
        };
        now.max(1)
    }
}

/// Shared, manually advanced clock.
///
/// Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<i64>>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub fn new(start: i64) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Returns the current time.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.now.get()
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: i64) {
        self.now.set(now);
    }

    /// Moves the clock forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.now.set(self.now.get() + millis);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Configuration for a [`Database`](crate::Database).
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Timestamp source for transactions.
    pub clock: Clock,
    /// Deliver observer notifications after every top-level operation.
    pub auto_flush: bool,
    /// Initial row capacity of archetype columns.
    pub initial_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            clock: Clock::System,
            auto_flush: true,
            initial_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl DatabaseConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for tests: a manual clock starting at 1.
    #[must_use]
    pub fn deterministic() -> Self {
        Self::default().with_clock(Clock::Manual(ManualClock::default()))
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Sets whether notifications flush automatically.
    #[must_use]
    pub fn with_auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    /// Sets the initial column capacity.
    #[must_use]
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}
