//! Undo/redo history.
//!
//! [`UndoRedoService`] listens to every transaction result of a database and
//! keeps the non-transient ones that asked to be undoable. Adjacent results
//! with equal coalesce keys collapse into one history step. Undo and redo
//! replay the recorded logs against the current state and are not recorded
//! themselves. Every query first delivers queued notifications, so a
//! transaction whose flush is still deferred already counts as history.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use strata_foundation::{Error, Result};
use strata_observe::Subscription;
use strata_storage::{ExecuteOptions, TransactionResult, WriteOp, coalesce, should_coalesce};
use tracing::debug;

use crate::database::Database;

#[derive(Debug, Default)]
struct History {
    steps: Vec<TransactionResult>,
    /// Number of steps currently applied.
    cursor: usize,
}

impl History {
    fn record(&mut self, result: &TransactionResult) {
        if result.transient || result.undoable.is_none() {
            return;
        }
        self.steps.truncate(self.cursor);
        let merged = match self.steps.pop() {
            Some(previous) if should_coalesce(&previous, result) => coalesce(previous, result.clone()),
            Some(previous) => {
                self.steps.push(previous);
                result.clone()
            }
            None => result.clone(),
        };
        self.steps.push(merged);
        self.cursor = self.steps.len();
    }
}

/// Undo/redo stack over one database.
///
/// Dropping the service stops recording.
pub struct UndoRedoService {
    db: Database,
    history: Rc<RefCell<History>>,
    _subscription: Subscription,
}

impl fmt::Debug for UndoRedoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let history = self.history.borrow();
        f.debug_struct("UndoRedoService")
            .field("steps", &history.steps.len())
            .field("cursor", &history.cursor)
            .finish_non_exhaustive()
    }
}

impl UndoRedoService {
    /// Starts recording the history of `db`.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        let history = Rc::new(RefCell::new(History::default()));
        let recorder = Rc::clone(&history);
        let subscription = db
            .observe_transactions()
            .subscribe(move |result| recorder.borrow_mut().record(result));
        Self {
            db: db.clone(),
            history,
            _subscription: subscription,
        }
    }

    /// Returns true if there is a step to undo.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.db.flush();
        self.history.borrow().cursor > 0
    }

    /// Returns true if there is an undone step to redo.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.db.flush();
        let history = self.history.borrow();
        history.cursor < history.steps.len()
    }

    /// Number of recorded steps, including undone ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.db.flush();
        self.history.borrow().steps.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reverts the latest applied step. Returns false if there is none.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the step no longer fits the store.
    pub fn undo(&self) -> Result<bool> {
        self.db.flush();
        let ops = {
            let history = self.history.borrow();
            match history.cursor.checked_sub(1) {
                Some(index) => history.steps[index].undo.clone(),
                None => return Ok(false),
            }
        };
        self.replay(&ops, "undo")?;
        self.history.borrow_mut().cursor -= 1;
        Ok(true)
    }

    /// Re-applies the latest undone step. Returns false if there is none.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the step no longer fits the store.
    pub fn redo(&self) -> Result<bool> {
        self.db.flush();
        let ops = {
            let history = self.history.borrow();
            match history.steps.get(history.cursor) {
                Some(step) => step.redo.clone(),
                None => return Ok(false),
            }
        };
        self.replay(&ops, "redo")?;
        self.history.borrow_mut().cursor += 1;
        Ok(true)
    }

    /// Forgets all recorded steps.
    pub fn clear(&self) {
        let mut history = self.history.borrow_mut();
        history.steps.clear();
        history.cursor = 0;
    }

    fn replay(&self, ops: &[WriteOp], direction: &'static str) -> Result<()> {
        debug!(direction, ops = ops.len(), "replaying history step");
        self.db
            .execute(ExecuteOptions::transient(false), |tx| tx.apply_operations(ops))
            .map(|_| ())
            .map_err(|err| {
                Error::precondition(format!("{direction} no longer fits the store: {err}"))
            })
    }
}
