//! The reconciling ledger.
//!
//! Named transactions are applied through [`TransactionEnvelope`]s carrying a
//! reconciliation id and a timestamp. A negative time marks a provisional
//! (transient) entry, a positive time a confirmed one, and a time of zero
//! cancels the entry with that id.
//!
//! Entries are kept sorted by `(|time|, id, name)`. Applying an envelope rolls
//! back every entry from the affected position, splices the ledger, and
//! replays the suffix, so a provisional write that is later confirmed (or
//! cancelled) ends in the same state as if the final order had been known
//! from the start. Confirmed entries at the head of the ledger can no longer
//! be reordered and are dropped from it.

use std::rc::Rc;

use strata_foundation::{Name, Result, Value};
use strata_observe::ObservedStore;
use strata_storage::{ExecuteOptions, StoreData, TransactionResult, WriteOp};
use tracing::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::plugin::TransactionFn;

/// Request to apply, supersede, or cancel a named transaction.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransactionEnvelope {
    /// Reconciliation key. A later envelope with the same id replaces the
    /// earlier entry.
    pub id: u64,
    /// Registered transaction name.
    pub name: Name,
    /// Arguments passed to the transaction.
    pub args: Value,
    /// Negative: provisional. Positive: confirmed. Zero: cancel.
    pub time: i64,
}

impl TransactionEnvelope {
    /// Creates an envelope.
    pub fn new(id: u64, name: impl Into<Name>, args: impl Into<Value>, time: i64) -> Self {
        Self {
            id,
            name: name.into(),
            args: args.into(),
            time,
        }
    }

    /// Creates an envelope cancelling entry `id`.
    pub fn cancel(id: u64, name: impl Into<Name>) -> Self {
        Self::new(id, name, Value::Nil, 0)
    }

    /// Returns true if the envelope is provisional.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.time < 0
    }
}

/// A provisional entry as persisted with a database snapshot.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AppliedEntry {
    /// Reconciliation key.
    pub id: u64,
    /// Transaction name.
    pub name: Name,
    /// Transaction arguments.
    pub args: Value,
    /// Negative timestamp.
    pub time: i64,
    /// Inverse log of the entry's last application, if it wrote anything.
    pub undo: Option<Vec<WriteOp>>,
}

/// Snapshot of a database: the store plus its provisional entries.
///
/// The store snapshot holds confirmed state only; provisional entries are
/// replayed on top of it when loaded.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DatabaseData {
    /// Confirmed store state.
    pub store: StoreData,
    /// Provisional entries in ledger order.
    pub applied: Vec<AppliedEntry>,
}

struct Entry {
    id: u64,
    name: Name,
    args: Value,
    time: i64,
    transaction: TransactionFn,
    undo: Option<Vec<WriteOp>>,
}

impl Entry {
    fn is_transient(&self) -> bool {
        self.time < 0
    }

    fn key(&self) -> (u64, u64, &str) {
        (self.time.unsigned_abs(), self.id, &self.name)
    }

    fn to_applied(&self) -> AppliedEntry {
        AppliedEntry {
            id: self.id,
            name: self.name.clone(),
            args: self.args.clone(),
            time: self.time,
            undo: self.undo.clone(),
        }
    }

    /// Runs the entry's transaction and keeps its undo log.
    fn run(&mut self, store: &ObservedStore, transient: bool) -> Result<TransactionResult<Value>> {
        let transaction = Rc::clone(&self.transaction);
        let args = &self.args;
        let result = store.execute(ExecuteOptions::transient(transient), |tx| transaction(tx, args))?;
        self.undo = (!result.is_empty()).then(|| result.undo.clone());
        Ok(result)
    }

    fn rollback(&mut self, store: &ObservedStore) {
        let Some(undo) = self.undo.take() else {
            return;
        };
        if let Err(err) = store.execute(ExecuteOptions::transient(true), |tx| tx.apply_operations(&undo)) {
            warn!(id = self.id, name = %self.name, error = %err, "entry rollback failed");
        }
    }
}

/// Ordered list of reconciling entries.
#[derive(Default)]
pub(crate) struct Ledger {
    entries: Vec<Entry>,
}

impl Ledger {
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn transient_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_transient()).count()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: u64) -> bool {
        self.position(id).is_some()
    }

    pub(crate) fn max_id(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.id).max()
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn insertion_point(&self, entry: &Entry) -> usize {
        self.entries.partition_point(|e| e.key() <= entry.key())
    }

    /// Undoes every entry from `from` to the end, newest first.
    fn rollback_from(&mut self, store: &ObservedStore, from: usize) {
        for entry in self.entries[from..].iter_mut().rev() {
            entry.rollback(store);
        }
    }

    /// Re-executes every entry from `from` to the end, oldest first.
    fn replay_from(&mut self, store: &ObservedStore, from: usize) {
        for entry in &mut self.entries[from..] {
            if let Err(err) = entry.run(store, true) {
                warn!(id = entry.id, name = %entry.name, error = %err, "replayed entry failed");
            }
        }
    }

    fn prune_confirmed(&mut self) {
        let confirmed = self
            .entries
            .iter()
            .take_while(|e| !e.is_transient())
            .count();
        self.entries.drain(..confirmed);
    }

    /// Applies an envelope.
    ///
    /// Returns the new entry's result, or `None` for a cancellation.
    ///
    /// # Errors
    ///
    /// Returns the transaction's error. The failed entry is removed and the
    /// rest of the ledger is replayed before returning.
    pub(crate) fn apply(
        &mut self,
        store: &ObservedStore,
        envelope: TransactionEnvelope,
        transaction: TransactionFn,
    ) -> Result<Option<TransactionResult<Value>>> {
        if envelope.time == 0 {
            self.cancel(store, envelope.id);
            return Ok(None);
        }

        let mut entry = Entry {
            id: envelope.id,
            name: envelope.name,
            args: envelope.args,
            time: envelope.time,
            transaction,
            undo: None,
        };
        let existing = self.position(entry.id);
        let insertion = self.insertion_point(&entry);
        let start = existing.map_or(insertion, |index| index.min(insertion));
        debug!(
            id = entry.id,
            name = %entry.name,
            time = entry.time,
            rollback = self.entries.len() - start,
            "applying reconciling entry"
        );

        self.rollback_from(store, start);
        if let Some(index) = existing {
            self.entries.remove(index);
        }
        let index = self.insertion_point(&entry);
        let transient = entry.is_transient();

        for before in &mut self.entries[start..index] {
            if let Err(err) = before.run(store, true) {
                warn!(id = before.id, name = %before.name, error = %err, "replayed entry failed");
            }
        }
        let result = entry.run(store, transient);
        match result {
            Ok(result) => {
                self.entries.insert(index, entry);
                self.replay_from(store, index + 1);
                self.prune_confirmed();
                Ok(Some(result))
            }
            Err(err) => {
                self.replay_from(store, index);
                self.prune_confirmed();
                Err(err)
            }
        }
    }

    /// Removes entry `id`, undoing it and replaying everything after it.
    pub(crate) fn cancel(&mut self, store: &ObservedStore, id: u64) {
        let Some(index) = self.position(id) else {
            return;
        };
        debug!(id, rollback = self.entries.len() - index, "cancelling reconciling entry");
        self.rollback_from(store, index);
        self.entries.remove(index);
        self.replay_from(store, index);
        self.prune_confirmed();
    }

    /// Snapshots the store with provisional entries excluded.
    pub(crate) fn to_data(&mut self, store: &ObservedStore) -> DatabaseData {
        let Some(first) = self.entries.iter().position(Entry::is_transient) else {
            return DatabaseData {
                store: store.to_data(),
                applied: Vec::new(),
            };
        };

        self.rollback_from(store, first);
        for entry in &mut self.entries[first..] {
            if !entry.is_transient() {
                if let Err(err) = entry.run(store, true) {
                    warn!(id = entry.id, name = %entry.name, error = %err, "confirmed entry failed");
                }
            }
        }
        let snapshot = store.to_data();
        self.rollback_from(store, first);
        self.replay_from(store, first);

        DatabaseData {
            store: snapshot,
            applied: self
                .entries
                .iter()
                .filter(|e| e.is_transient())
                .map(Entry::to_applied)
                .collect(),
        }
    }

    /// Replaces the store and ledger with a snapshot and replays its
    /// provisional entries.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry names an unknown transaction or the
    /// store snapshot does not fit the schema. Nothing changes in that case.
    pub(crate) fn load(
        &mut self,
        store: &ObservedStore,
        data: &DatabaseData,
        lookup: impl Fn(&Name) -> Result<TransactionFn>,
    ) -> Result<()> {
        let mut entries = data
            .applied
            .iter()
            .map(|applied| {
                Ok(Entry {
                    id: applied.id,
                    name: applied.name.clone(),
                    args: applied.args.clone(),
                    time: applied.time,
                    transaction: lookup(&applied.name)?,
                    undo: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| a.key().cmp(&b.key()));

        store.from_data(&data.store)?;
        self.entries = entries;
        self.replay_from(store, 0);
        self.prune_confirmed();
        debug!(entries = self.entries.len(), "ledger restored");
        Ok(())
    }
}
