//! Actions: named operations that report failure as a value.
//!
//! An action receives the database and its arguments and returns an
//! [`ActionOutcome`]. Application-level failures, such as an action that is
//! not available in the current state, are returned as
//! [`ActionOutcome::Failed`] rather than as errors, so callers can branch on
//! them directly.

use std::rc::Rc;

use strata_foundation::{Result, Value};

use crate::database::Database;

/// Result of running an action.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutcome {
    /// The action ran and produced a value.
    Completed(Value),
    /// The action declined to run, with a reason.
    Failed(String),
}

impl ActionOutcome {
    /// Completed with no value.
    #[must_use]
    pub fn done() -> Self {
        Self::Completed(Value::Nil)
    }

    /// Failed with a reason.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Returns true if the action completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns the produced value, if the action completed.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Failed(_) => None,
        }
    }
}

/// An action body.
pub type ActionFn = Rc<dyn Fn(&Database, &Value) -> Result<ActionOutcome>>;
