//! A transactional store that notifies observers of its changes.
//!
//! [`ObservedStore`] wraps a [`TransactionalStore`] behind a shared,
//! single-threaded handle. Every non-empty transaction result is queued and,
//! at the next flush, routed to the observers it affects. Observers are
//! created lazily by the factory methods and only track the store while they
//! have at least one subscriber.
//!
//! Notifications are delivered after every internal borrow is released, so
//! subscribers may read the store, subscribe to further observers, or
//! execute new transactions from inside a callback. Writes made during a
//! flush are picked up by the same flush loop.
//!
//! By default a transaction flushes as soon as it commits. Installing a
//! [`FlushScheduler`] defers that flush to the scheduler's next turn, so a
//! synchronous burst of transactions reaches each observer as one batch.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use strata_foundation::{Entity, Error, Name, Result, Value, Values};
use strata_storage::{
    ArchetypeId, ExecuteOptions, Query, Store, StoreData, StoreSchema, Transaction,
    TransactionResult, TransactionalStore,
};
use tracing::{debug, trace, warn};

use crate::observable::{Observable, Subject, Subscription};
use crate::tables::{
    ChangeBatch, DeepRows, ObserverTables, Registry, ValueState, deep_state, select_state,
};

struct Inner {
    store: RefCell<TransactionalStore>,
    tables: RefCell<ObserverTables>,
    pending: RefCell<Vec<Rc<TransactionResult>>>,
    reset: Cell<bool>,
    batch_depth: Cell<usize>,
    flushing: Cell<bool>,
    auto_flush: bool,
    scheduler: RefCell<Option<FlushScheduler>>,
    scheduled: Cell<bool>,
}

/// Hook that arranges one later call to [`ObservedStore::flush`].
pub type FlushScheduler = Rc<dyn Fn()>;

/// Shared handle to an observed store.
///
/// Clones refer to the same store.
#[derive(Clone)]
pub struct ObservedStore {
    inner: Rc<Inner>,
}

impl fmt::Debug for ObservedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedStore")
            .field("pending", &self.inner.pending.borrow().len())
            .field("batch_depth", &self.inner.batch_depth.get())
            .field("auto_flush", &self.inner.auto_flush)
            .field("deferred", &self.inner.scheduler.borrow().is_some())
            .finish_non_exhaustive()
    }
}

type Select<K, T, S> = fn(&mut ObserverTables) -> &mut Registry<K, T, S>;
type Activate<K, T, S> = fn(Option<&Store>, &K, &Subject<T>) -> S;

impl ObservedStore {
    /// Wraps a store. Notifications flush after every transaction.
    #[must_use]
    pub fn new(store: TransactionalStore) -> Self {
        Self::with_auto_flush(store, true)
    }

    /// Wraps a store, choosing whether transactions flush on their own.
    ///
    /// Without auto-flush, notifications wait for [`ObservedStore::flush`].
    #[must_use]
    pub fn with_auto_flush(store: TransactionalStore, auto_flush: bool) -> Self {
        Self {
            inner: Rc::new(Inner {
                store: RefCell::new(store),
                tables: RefCell::new(ObserverTables::default()),
                pending: RefCell::new(Vec::new()),
                reset: Cell::new(false),
                batch_depth: Cell::new(0),
                flushing: Cell::new(false),
                auto_flush,
                scheduler: RefCell::new(None),
                scheduled: Cell::new(false),
            }),
        }
    }

    /// Creates an empty store for a schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is inconsistent.
    pub fn from_schema(schema: StoreSchema) -> Result<Self> {
        Ok(Self::new(TransactionalStore::from_schema(schema)?))
    }

    /// Runs `f` against the current store state.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a mutator of this store.
    pub fn read<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        f(self.inner.store.borrow().store())
    }

    /// Executes a transaction and queues its diff for observers.
    ///
    /// # Errors
    ///
    /// Returns the mutator's error after rolling back, or a precondition
    /// error if called from inside another mutator of this store.
    pub fn execute<T, F>(&self, options: ExecuteOptions, mutator: F) -> Result<TransactionResult<T>>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let result = {
            let mut store = self
                .inner
                .store
                .try_borrow_mut()
                .map_err(|_| Error::precondition("store is already executing a transaction"))?;
            store.execute(options, mutator)?
        };
        if !result.is_empty() {
            self.inner.pending.borrow_mut().push(Rc::new(result.diff()));
        }
        self.maybe_flush();
        Ok(result)
    }

    /// Adds components, resources, and archetypes to the schema.
    ///
    /// # Errors
    ///
    /// Returns an error on a conflicting definition or if the store is busy.
    pub fn extend(&self, schema: &StoreSchema) -> Result<()> {
        self.inner
            .store
            .try_borrow_mut()
            .map_err(|_| Error::precondition("store is busy"))?
            .extend(schema)
    }

    /// Captures a snapshot of the store.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a mutator of this store.
    #[must_use]
    pub fn to_data(&self) -> StoreData {
        self.inner.store.borrow().to_data()
    }

    /// Replaces the store's contents with a snapshot and notifies every
    /// observer whose value changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot does not fit the schema or the store
    /// is busy.
    pub fn from_data(&self, data: &StoreData) -> Result<()> {
        self.inner
            .store
            .try_borrow_mut()
            .map_err(|_| Error::precondition("store is busy"))?
            .load(data)?;
        self.inner.reset.set(true);
        debug!(entities = data.entity_count(), "observed store reloaded");
        self.maybe_flush();
        Ok(())
    }

    /// Compacts storage buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is busy.
    pub fn compact(&self) -> Result<()> {
        self.inner
            .store
            .try_borrow_mut()
            .map_err(|_| Error::precondition("store is busy"))?
            .compact();
        Ok(())
    }

    /// Runs `f` with notifications held back, then flushes once.
    ///
    /// Batches nest; only the outermost one flushes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let depth = &self.inner.batch_depth;
        depth.set(depth.get() + 1);
        let out = f();
        depth.set(depth.get() - 1);
        self.maybe_flush();
        out
    }

    /// Returns true if a batch is open.
    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.inner.batch_depth.get() > 0
    }

    /// Replaces the hook that defers auto-flushes and returns the old one.
    ///
    /// While a scheduler is installed, a committed transaction asks it for
    /// one flush instead of flushing inline. Further commits before that
    /// flush runs join the same batch. Passing `None` restores inline
    /// flushing; anything still queued waits for the next flush.
    pub fn set_flush_scheduler(&self, scheduler: Option<FlushScheduler>) -> Option<FlushScheduler> {
        self.inner.scheduled.set(false);
        self.inner.scheduler.replace(scheduler)
    }

    fn maybe_flush(&self) {
        if !self.inner.auto_flush {
            return;
        }
        let scheduler = self.inner.scheduler.borrow().clone();
        match scheduler {
            Some(schedule) => {
                if !self.inner.scheduled.replace(true) {
                    trace!("flush deferred");
                    schedule();
                }
            }
            None => self.flush(),
        }
    }

    /// Delivers queued notifications.
    ///
    /// Does nothing inside a batch or a flush already in progress. Changes
    /// made by subscribers are delivered before this returns.
    pub fn flush(&self) {
        let inner = &self.inner;
        if inner.flushing.get() || inner.batch_depth.get() > 0 {
            return;
        }
        inner.flushing.set(true);
        inner.scheduled.set(false);
        loop {
            let results = inner.pending.take();
            let reset = inner.reset.replace(false);
            if results.is_empty() && !reset {
                break;
            }
            let Ok(store) = inner.store.try_borrow() else {
                // Called from inside a mutator; the next flush picks these up.
                inner.pending.borrow_mut().splice(0..0, results);
                inner.reset.set(reset || inner.reset.get());
                break;
            };
            trace!(results = results.len(), reset, "flushing observers");
            let batch = ChangeBatch::new(results, reset);
            let emissions = {
                let mut tables = inner.tables.borrow_mut();
                tables.prune();
                tables.collect(store.store(), &batch)
            };
            drop(store);
            for emission in emissions {
                emission();
            }
        }
        inner.flushing.set(false);
    }

    /// Returns the number of live observers and cached handles.
    ///
    /// Drops to zero once every subscription and handle is gone.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        let mut tables = self.inner.tables.borrow_mut();
        tables.prune();
        tables.len()
    }

    fn observe<K, T, S>(
        &self,
        key: K,
        replay: bool,
        select: Select<K, T, S>,
        activate: Activate<K, T, S>,
    ) -> Observable<T>
    where
        K: Clone + Eq + Hash + 'static,
        T: Clone + 'static,
        S: 'static,
    {
        let mut tables = self.inner.tables.borrow_mut();
        let registry = select(&mut tables);
        if let Some(subject) = registry.cached(&key) {
            return subject.observable();
        }

        let subject = if replay {
            Subject::replaying()
        } else {
            Subject::new()
        };
        let active_inner = Rc::downgrade(&self.inner);
        let active_key = key.clone();
        let idle_inner = Rc::downgrade(&self.inner);
        let idle_key = key.clone();
        let subject = subject.with_hooks(
            move |subject| on_active(&active_inner, &active_key, subject, select, activate),
            move |subject| on_idle(&idle_inner, &idle_key, subject, select),
        );
        registry.remember(key, &subject);
        subject.observable()
    }

    /// Observes one entity's full row, or `None` once it is gone.
    ///
    /// Emits only when the row actually changes. Replays the current row.
    #[must_use]
    pub fn entity(&self, entity: Entity) -> Observable<Option<Values>> {
        self.observe(entity, true, ObserverTables::entities_mut, |store, entity, subject| {
            let last = store.and_then(|store| store.read(*entity));
            if store.is_some() {
                subject.set_latest(last.clone());
            }
            ValueState {
                last,
                primed: store.is_some(),
            }
        })
    }

    /// Observes writes to a component. Emits once per flush that wrote it.
    #[must_use]
    pub fn component(&self, component: impl Into<Name>) -> Observable<()> {
        self.observe(component.into(), false, ObserverTables::components_mut, |_, _, _| ())
    }

    /// Observes row changes in an archetype. Emits once per flush that
    /// touched it.
    #[must_use]
    pub fn archetype(&self, archetype: ArchetypeId) -> Observable<()> {
        self.observe(archetype, false, ObserverTables::archetypes_mut, |_, _, _| ())
    }

    /// Observes a resource's value. Replays the current value.
    #[must_use]
    pub fn resource(&self, resource: impl Into<Name>) -> Observable<Option<Value>> {
        self.observe(resource.into(), true, ObserverTables::resources_mut, |store, name, subject| {
            let last = store.and_then(|store| store.resource_get(name));
            if store.is_some() {
                subject.set_latest(last.clone());
            }
            ValueState {
                last,
                primed: store.is_some(),
            }
        })
    }

    /// Observes the ordered entity list matching a query.
    ///
    /// Structurally equal queries share one observer. Emits only when the
    /// list changes; writes to components the query never reads are skipped
    /// without requerying. Replays the current list.
    #[must_use]
    pub fn select(&self, query: Query) -> Observable<Vec<Entity>> {
        self.observe(query, true, ObserverTables::selects_mut, |store, query, subject| {
            let state = select_state(store, query);
            if state.primed {
                subject.set_latest(state.result.clone());
            }
            state
        })
    }

    /// Observes the matching entities together with their included values.
    ///
    /// Unlike [`ObservedStore::select`], value changes of members emit.
    #[must_use]
    pub fn select_deep(&self, query: Query) -> Observable<DeepRows> {
        self.observe(query, true, ObserverTables::deep_mut, |store, query, subject| {
            let state = deep_state(store, query);
            if state.primed {
                subject.set_latest(state.rows.clone());
            }
            state
        })
    }

    /// Observes every non-empty transaction result, in commit order.
    #[must_use]
    pub fn transactions(&self) -> Observable<Rc<TransactionResult>> {
        self.observe((), false, ObserverTables::transactions_mut, |_, (), _| ())
    }

    /// Observes a value computed from the store whenever one of `resources`
    /// changes.
    ///
    /// `compute` runs on activation and again after each flush that touched a
    /// listed resource. A result equal to the previous one is not published,
    /// so writes to several listed resources in one flush emit at most once.
    /// Unlike the other factories the observable is not shared; each call
    /// tracks its resources separately. Replays the current value.
    #[must_use]
    pub fn dependent<T, I, N>(&self, resources: I, compute: impl Fn(&Store) -> T + 'static) -> Observable<T>
    where
        T: Clone + PartialEq + 'static,
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        let resources: Rc<[Name]> = resources.into_iter().map(Into::into).collect();
        let compute: Rc<dyn Fn(&Store) -> T> = Rc::new(compute);
        let links: Rc<RefCell<Vec<Subscription>>> = Rc::default();
        let idle_links = Rc::clone(&links);
        let weak = Rc::downgrade(&self.inner);

        Subject::replaying()
            .with_hooks(
                move |subject: &Subject<T>| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let store = ObservedStore { inner };
                    if let Some(value) = store.try_read(|s| compute(s)) {
                        subject.set_latest(value);
                    }
                    let subscriptions = resources
                        .iter()
                        .map(|name| {
                            let target = subject.downgrade();
                            let source = Rc::downgrade(&store.inner);
                            let compute = Rc::clone(&compute);
                            store.resource(name.clone()).subscribe(move |_| {
                                let (Some(subject), Some(inner)) = (target.upgrade(), source.upgrade())
                                else {
                                    return;
                                };
                                let Some(next) = (ObservedStore { inner }).try_read(|s| compute(s)) else {
                                    return;
                                };
                                if subject.observable().latest().as_ref() != Some(&next) {
                                    subject.emit(next);
                                }
                            })
                        })
                        .collect();
                    *links.borrow_mut() = subscriptions;
                },
                move |_| drop(idle_links.take()),
            )
            .observable()
    }

    fn try_read<R>(&self, f: impl FnOnce(&Store) -> R) -> Option<R> {
        let store = self.inner.store.try_borrow().ok()?;
        Some(f(store.store()))
    }

    /// Checks if two handles refer to the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &ObservedStore) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

fn on_active<K, T, S>(
    inner: &Weak<Inner>,
    key: &K,
    subject: &Subject<T>,
    select: Select<K, T, S>,
    activate: Activate<K, T, S>,
) where
    K: Clone + Eq + Hash,
    T: 'static,
{
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let store = inner.store.try_borrow();
    let state = activate(store.as_ref().ok().map(|store| store.store()), key, subject);
    if store.is_err() {
        // Activated from inside a mutator; derive the value at the next flush.
        inner.reset.set(true);
    }
    drop(store);
    match inner.tables.try_borrow_mut() {
        Ok(mut tables) => select(&mut tables).activate(key.clone(), subject.clone(), state),
        Err(_) => warn!("observer activated while observer tables were busy"),
    }
}

fn on_idle<K, T, S>(inner: &Weak<Inner>, key: &K, subject: &Subject<T>, select: Select<K, T, S>)
where
    K: Clone + Eq + Hash,
    T: 'static,
{
    let Some(inner) = inner.upgrade() else {
        return;
    };
    // Busy tables are pruned at the next flush instead.
    if let Ok(mut tables) = inner.tables.try_borrow_mut() {
        select(&mut tables).deactivate(key, subject);
    }
}
