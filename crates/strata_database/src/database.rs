//! The database handle.
//!
//! A [`Database`] owns an observed store, the transactions, actions, and
//! systems declared by its plugins, and the reconciling ledger. Named
//! transactions go through the ledger; direct [`Database::execute`] calls
//! bypass it and are always confirmed.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use strata_foundation::{Entity, Error, ErrorKind, Name, Result, Value, Values};
use strata_observe::{DeepRows, FlushScheduler, Observable, ObservedStore};
use strata_storage::{
    ArchetypeId, ExecuteOptions, Query, Store, Transaction, TransactionResult, TransactionalStore,
};
use tokio::sync::Notify;
use tokio::task::{LocalSet, spawn_local};
use tracing::debug;

use crate::action::{ActionFn, ActionOutcome};
use crate::config::DatabaseConfig;
use crate::plugin::{Plugin, TransactionFn};
use crate::reconcile::{DatabaseData, Ledger, TransactionEnvelope};
use crate::scheduler::{Schedule, system_order};
use crate::system::SystemFn;

struct Shared {
    store: ObservedStore,
    config: DatabaseConfig,
    transactions: RefCell<BTreeMap<Name, TransactionFn>>,
    actions: RefCell<BTreeMap<Name, ActionFn>>,
    schedules: RefCell<BTreeMap<Name, Schedule>>,
    systems: RefCell<BTreeMap<Name, SystemFn>>,
    order: RefCell<Vec<Vec<Name>>>,
    ledger: RefCell<Ledger>,
    next_id: Cell<u64>,
}

/// Shared, single-threaded database handle.
///
/// Clones refer to the same database.
#[derive(Clone)]
pub struct Database {
    shared: Rc<Shared>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.shared.store)
            .field("transactions", &self.shared.transactions.borrow().keys().collect::<Vec<_>>())
            .field("systems", &*self.shared.order.borrow())
            .field("next_id", &self.shared.next_id.get())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Creates a database from a plugin.
    ///
    /// Every declared system is created once, in name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is inconsistent or the systems cannot
    /// be scheduled.
    pub fn new(plugin: &Plugin, config: DatabaseConfig) -> Result<Self> {
        let store = Store::with_capacity(plugin.schema.clone(), config.initial_capacity)?;
        let store = ObservedStore::with_auto_flush(TransactionalStore::new(store), config.auto_flush);
        let db = Self {
            shared: Rc::new(Shared {
                store,
                config,
                transactions: RefCell::new(BTreeMap::new()),
                actions: RefCell::new(BTreeMap::new()),
                schedules: RefCell::new(BTreeMap::new()),
                systems: RefCell::new(BTreeMap::new()),
                order: RefCell::new(Vec::new()),
                ledger: RefCell::new(Ledger::default()),
                next_id: Cell::new(1),
            }),
        };
        db.install(plugin, false)?;
        debug!(
            components = plugin.schema.components.len(),
            transactions = plugin.transactions.len(),
            systems = plugin.systems.len(),
            "database created"
        );
        Ok(db)
    }

    /// Adds a plugin at runtime.
    ///
    /// # Errors
    ///
    /// Returns a schema conflict, or a scheduling error if the new systems
    /// cannot be ordered together with the existing ones. Nothing changes
    /// in that case.
    pub fn extend(&self, plugin: &Plugin) -> Result<()> {
        self.install(plugin, true)
    }

    fn install(&self, plugin: &Plugin, extend_schema: bool) -> Result<()> {
        let mut schedules = self.shared.schedules.borrow().clone();
        schedules.extend(
            plugin
                .systems
                .iter()
                .map(|(name, decl)| (name.clone(), decl.schedule.clone())),
        );
        let order = system_order(&schedules)?;
        if extend_schema {
            self.shared.store.extend(&plugin.schema)?;
        }

        self.shared.transactions.borrow_mut().extend(
            plugin
                .transactions
                .iter()
                .map(|(name, f)| (name.clone(), Rc::clone(f))),
        );
        self.shared.actions.borrow_mut().extend(
            plugin
                .actions
                .iter()
                .map(|(name, f)| (name.clone(), Rc::clone(f))),
        );
        *self.shared.schedules.borrow_mut() = schedules;
        *self.shared.order.borrow_mut() = order;

        for (name, decl) in &plugin.systems {
            let run = (decl.create)(self);
            let mut systems = self.shared.systems.borrow_mut();
            match run {
                Some(run) => systems.insert(name.clone(), run),
                None => systems.remove(name),
            };
        }
        Ok(())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }

    /// Returns the underlying observed store.
    #[must_use]
    pub fn store(&self) -> &ObservedStore {
        &self.shared.store
    }

    /// Returns the current time of the configured clock.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.shared.config.clock.now()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Runs `f` against the current store state.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a transaction of this database.
    pub fn read<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        self.shared.store.read(f)
    }

    /// Runs a query.
    #[must_use]
    pub fn select(&self, query: &Query) -> Vec<Entity> {
        self.read(|store| store.select(query))
    }

    /// Reads an entity's full row.
    #[must_use]
    pub fn read_entity(&self, entity: Entity) -> Option<Values> {
        self.read(|store| store.read(entity))
    }

    /// Reads a resource.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<Value> {
        self.read(|store| store.resource_get(name))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Executes a mutator directly, outside the reconciling ledger.
    ///
    /// # Errors
    ///
    /// Returns the mutator's error after rolling back.
    pub fn execute<T, F>(&self, options: ExecuteOptions, mutator: F) -> Result<TransactionResult<T>>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        self.shared.store.execute(options, mutator)
    }

    pub(crate) fn transaction_fn(&self, name: &Name) -> Result<TransactionFn> {
        self.shared
            .transactions
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_transaction(name.clone()))
    }

    /// Allocates a fresh reconciliation id.
    #[must_use]
    pub fn next_transaction_id(&self) -> u64 {
        let id = self.shared.next_id.get();
        self.shared.next_id.set(id + 1);
        id
    }

    /// Runs a named transaction as a confirmed entry at the current time.
    ///
    /// Returns the transaction's value.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTransaction` or the transaction's own error.
    pub fn transact(&self, name: impl Into<Name>, args: impl Into<Value>) -> Result<Value> {
        let name = name.into();
        let envelope = TransactionEnvelope::new(self.next_transaction_id(), name.clone(), args, self.now());
        let result = self
            .apply(envelope)
            .map_err(|err| err.in_frame(format!("transaction {name}")))?;
        Ok(result.map_or(Value::Nil, |result| result.value))
    }

    /// Applies, supersedes, or cancels a ledger entry.
    ///
    /// Observers receive one batched notification for the whole rollback and
    /// replay.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTransaction` if the name is not registered, or the
    /// transaction's own error.
    pub fn apply(&self, envelope: TransactionEnvelope) -> Result<Option<TransactionResult<Value>>> {
        let transaction = self.transaction_fn(&envelope.name)?;
        let store = &self.shared.store;
        store.batch(|| {
            let mut ledger = self
                .shared
                .ledger
                .try_borrow_mut()
                .map_err(|_| Error::precondition("reconciling ledger is busy"))?;
            ledger.apply(store, envelope, transaction)
        })
    }

    /// Cancels ledger entry `id`. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if called while the ledger is busy.
    pub fn cancel(&self, id: u64) -> Result<()> {
        let store = &self.shared.store;
        store.batch(|| {
            self.shared
                .ledger
                .try_borrow_mut()
                .map_err(|_| Error::precondition("reconciling ledger is busy"))?
                .cancel(store, id);
            Ok(())
        })
    }

    /// Returns the number of provisional ledger entries.
    #[must_use]
    pub fn pending_transients(&self) -> usize {
        self.shared.ledger.borrow().transient_count()
    }

    /// Runs a named action.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAction` if the name is not registered, or the
    /// action's own error.
    pub fn act(&self, name: &str, args: impl Into<Value>) -> Result<ActionOutcome> {
        let action = self
            .shared
            .actions
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::UnknownAction(Name::from(name))))?;
        action(self, &args.into())
    }

    // =========================================================================
    // Systems
    // =========================================================================

    /// Returns the system tiers.
    #[must_use]
    pub fn system_order(&self) -> Vec<Vec<Name>> {
        self.shared.order.borrow().clone()
    }

    /// Runs every system once, tier by tier.
    ///
    /// Systems of one tier are all started before any of them is awaited;
    /// the next tier starts once every future of the current one finished.
    /// Each tier runs under [`Database::coalesce`], so the writes its systems
    /// make between two suspension points reach observers as one batch.
    ///
    /// # Errors
    ///
    /// Returns the first system error of a tier, after the whole tier has
    /// finished.
    pub async fn run_systems(&self) -> Result<()> {
        for tier in self.system_order() {
            let runs: Vec<(Name, SystemFn)> = {
                let systems = self.shared.systems.borrow();
                tier.iter()
                    .filter_map(|name| systems.get(name).map(|run| (name.clone(), Rc::clone(run))))
                    .collect()
            };

            let outcomes = self
                .coalesce(async {
                    let handles: Vec<_> = runs
                        .into_iter()
                        .filter_map(|(name, run)| run(self).map(|future| (name, spawn_local(future))))
                        .collect();
                    let mut outcomes = Vec::with_capacity(handles.len());
                    for (name, handle) in handles {
                        outcomes.push((name, handle.await));
                    }
                    outcomes
                })
                .await;

            let mut first_error = None;
            for (name, outcome) in outcomes {
                let err = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(err)) => err,
                    Err(join) => Error::new(ErrorKind::Async(join.to_string())),
                };
                first_error.get_or_insert(err.in_frame(format!("system {name}")));
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Captures the confirmed store state and the provisional entries.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if called while the ledger is busy.
    pub fn to_data(&self) -> Result<DatabaseData> {
        let store = &self.shared.store;
        store.batch(|| {
            let mut ledger = self
                .shared
                .ledger
                .try_borrow_mut()
                .map_err(|_| Error::precondition("reconciling ledger is busy"))?;
            Ok(ledger.to_data(store))
        })
    }

    /// Restores a snapshot and replays its provisional entries.
    ///
    /// Later transaction ids are allocated past every restored id.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry names an unknown transaction or the
    /// store snapshot does not fit the schema.
    pub fn from_data(&self, data: &DatabaseData) -> Result<()> {
        let store = &self.shared.store;
        let max_id = store.batch(|| {
            let mut ledger = self
                .shared
                .ledger
                .try_borrow_mut()
                .map_err(|_| Error::precondition("reconciling ledger is busy"))?;
            ledger.load(store, data, |name| self.transaction_fn(name))?;
            Ok::<_, Error>(ledger.max_id())
        })?;
        if let Some(max) = max_id {
            let next = self.shared.next_id.get().max(max + 1);
            self.shared.next_id.set(next);
        }
        Ok(())
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Runs `f` with notifications held back, then flushes once.
    ///
    /// Inside [`Database::coalesce`] the flush waits for the next
    /// suspension point instead.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.shared.store.batch(f)
    }

    /// Drives `future` on a local task set that delivers notifications only
    /// when the future or one of its local tasks suspends.
    ///
    /// Transactions committed in one synchronous burst reach each observer
    /// as a single batch. Tasks spawned with [`tokio::task::spawn_local`]
    /// from inside `future` share the same scheduling. Whatever is still
    /// queued when `future` completes is flushed before this returns.
    pub async fn coalesce<F: Future>(&self, future: F) -> F::Output {
        let store = &self.shared.store;
        let wake = Rc::new(Notify::new());
        let local = LocalSet::new();
        let flusher = {
            let store = store.clone();
            let wake = Rc::clone(&wake);
            local.spawn_local(async move {
                loop {
                    wake.notified().await;
                    store.flush();
                }
            })
        };
        let scheduler: FlushScheduler = Rc::new(move || wake.notify_one());
        let restore = RestoreScheduler {
            store,
            previous: store.set_flush_scheduler(Some(scheduler)),
        };
        let output = local.run_until(future).await;
        flusher.abort();
        drop(restore);
        store.flush();
        output
    }

    /// Delivers queued notifications.
    pub fn flush(&self) {
        self.shared.store.flush();
    }

    /// Observes one entity's row.
    #[must_use]
    pub fn observe_entity(&self, entity: Entity) -> Observable<Option<Values>> {
        self.shared.store.entity(entity)
    }

    /// Observes writes to a component.
    #[must_use]
    pub fn observe_component(&self, component: impl Into<Name>) -> Observable<()> {
        self.shared.store.component(component)
    }

    /// Observes row changes of an archetype.
    #[must_use]
    pub fn observe_archetype(&self, archetype: ArchetypeId) -> Observable<()> {
        self.shared.store.archetype(archetype)
    }

    /// Observes a resource.
    #[must_use]
    pub fn observe_resource(&self, resource: impl Into<Name>) -> Observable<Option<Value>> {
        self.shared.store.resource(resource)
    }

    /// Observes the entities matching a query.
    #[must_use]
    pub fn observe_select(&self, query: Query) -> Observable<Vec<Entity>> {
        self.shared.store.select(query)
    }

    /// Observes the entities matching a query with their included values.
    #[must_use]
    pub fn observe_select_deep(&self, query: Query) -> Observable<DeepRows> {
        self.shared.store.select_deep(query)
    }

    /// Observes every non-empty transaction result.
    #[must_use]
    pub fn observe_transactions(&self) -> Observable<Rc<TransactionResult>> {
        self.shared.store.transactions()
    }

    /// Observes a value computed from the store, recomputed when one of
    /// `resources` changes.
    #[must_use]
    pub fn observe_dependent<T, I, N>(
        &self,
        resources: I,
        compute: impl Fn(&Store) -> T + 'static,
    ) -> Observable<T>
    where
        T: Clone + PartialEq + 'static,
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        self.shared.store.dependent(resources, compute)
    }
}

/// Puts the previous flush scheduler back, even if the coalesced future
/// is dropped early.
struct RestoreScheduler<'a> {
    store: &'a ObservedStore,
    previous: Option<FlushScheduler>,
}

impl Drop for RestoreScheduler<'_> {
    fn drop(&mut self) {
        self.store.set_flush_scheduler(self.previous.take());
    }
}
