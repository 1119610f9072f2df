//! Observer registry and change routing.
//!
//! Each observer kind keeps a [`Registry`]: weak handles for factory caching
//! and, while an observer has subscribers, its tracking state. Given a batch
//! of transaction results, [`ObserverTables::collect`] works out which
//! observers must be notified and returns the notifications as closures so
//! that they run after every borrow is released.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::rc::Rc;

use strata_foundation::{Entity, Name, Value, Values};
use strata_storage::{ArchetypeId, ID, Query, Store, TransactionResult};

use crate::observable::{Subject, WeakSubject};

/// One entity's included values, as emitted by deep select observers.
pub type DeepRows = Vec<(Entity, Values)>;

/// A deferred notification.
pub(crate) type Emission = Box<dyn FnOnce()>;

/// Tracking state of one active observer.
pub(crate) struct Tracked<T, S> {
    pub(crate) subject: Subject<T>,
    pub(crate) state: S,
}

/// Observers of one kind, keyed by what they watch.
pub(crate) struct Registry<K, T, S> {
    handles: HashMap<K, WeakSubject<T>>,
    active: HashMap<K, Tracked<T, S>>,
}

impl<K: Clone + Eq + Hash, T: 'static, S> Default for Registry<K, T, S> {
    fn default() -> Self {
        Self {
            handles: HashMap::new(),
            active: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash, T: 'static, S> Registry<K, T, S> {
    /// Returns the cached channel for a key, dropping a dead handle.
    pub(crate) fn cached(&mut self, key: &K) -> Option<Subject<T>> {
        let subject = self.handles.get(key).and_then(WeakSubject::upgrade);
        if subject.is_none() {
            self.handles.remove(key);
        }
        subject
    }

    pub(crate) fn remember(&mut self, key: K, subject: &Subject<T>) {
        self.handles.insert(key, subject.downgrade());
    }

    pub(crate) fn activate(&mut self, key: K, subject: Subject<T>, state: S) {
        self.handles.insert(key.clone(), subject.downgrade());
        self.active.insert(key, Tracked { subject, state });
    }

    pub(crate) fn deactivate(&mut self, key: &K, subject: &Subject<T>) {
        if self
            .active
            .get(key)
            .is_some_and(|tracked| tracked.subject.ptr_eq(subject))
        {
            self.active.remove(key);
        }
        if self
            .handles
            .get(key)
            .is_some_and(|handle| handle.points_to(subject))
        {
            self.handles.remove(key);
        }
    }

    /// Drops observers that lost every subscriber and dead handles.
    pub(crate) fn prune(&mut self) {
        self.active
            .retain(|_, tracked| tracked.subject.subscriber_count() > 0);
        self.handles.retain(|_, handle| !handle.is_dead());
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut Tracked<T, S>> {
        self.active.get_mut(key)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut Tracked<T, S>)> {
        self.active.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len() + self.active.len()
    }
}

/// State of an entity observer.
pub(crate) struct ValueState<V> {
    pub(crate) last: V,
    pub(crate) primed: bool,
}

/// State of a select observer.
pub(crate) struct SelectState {
    pub(crate) columns: BTreeSet<Name>,
    pub(crate) result: Vec<Entity>,
    pub(crate) members: HashSet<Entity>,
    pub(crate) primed: bool,
}

/// State of a deep select observer.
pub(crate) struct DeepState {
    pub(crate) columns: BTreeSet<Name>,
    pub(crate) rows: DeepRows,
    pub(crate) members: HashSet<Entity>,
    pub(crate) primed: bool,
}

/// Changes accumulated since the last flush.
pub(crate) struct ChangeBatch {
    pub(crate) results: Vec<Rc<TransactionResult>>,
    /// Changed entities and the components written on each.
    pub(crate) entities: BTreeMap<Entity, BTreeSet<Name>>,
    pub(crate) components: BTreeSet<Name>,
    pub(crate) archetypes: BTreeSet<ArchetypeId>,
    /// Every observer re-derives its value (after a snapshot load, or when an
    /// observer was activated while the store was busy).
    pub(crate) reset: bool,
}

impl ChangeBatch {
    pub(crate) fn new(results: Vec<Rc<TransactionResult>>, reset: bool) -> Self {
        let mut entities: BTreeMap<Entity, BTreeSet<Name>> = BTreeMap::new();
        let mut components = BTreeSet::new();
        let mut archetypes = BTreeSet::new();
        for result in &results {
            for (entity, patch) in &result.changed_entities {
                let names = entities.entry(*entity).or_default();
                if let Some(patch) = patch {
                    names.extend(patch.keys().cloned());
                }
            }
            components.extend(result.changed_components.iter().cloned());
            archetypes.extend(result.changed_archetypes.iter().copied());
        }
        Self {
            results,
            entities,
            components,
            archetypes,
            reset,
        }
    }
}

/// Every observer of one store.
#[derive(Default)]
pub(crate) struct ObserverTables {
    pub(crate) entities: Registry<Entity, Option<Values>, ValueState<Option<Values>>>,
    pub(crate) components: Registry<Name, (), ()>,
    pub(crate) archetypes: Registry<ArchetypeId, (), ()>,
    pub(crate) resources: Registry<Name, Option<Value>, ValueState<Option<Value>>>,
    pub(crate) selects: Registry<Query, Vec<Entity>, SelectState>,
    pub(crate) deep: Registry<Query, DeepRows, DeepState>,
    pub(crate) transactions: Registry<(), Rc<TransactionResult>, ()>,
}

impl ObserverTables {
    pub(crate) fn entities_mut(&mut self) -> &mut Registry<Entity, Option<Values>, ValueState<Option<Values>>> {
        &mut self.entities
    }

    pub(crate) fn components_mut(&mut self) -> &mut Registry<Name, (), ()> {
        &mut self.components
    }

    pub(crate) fn archetypes_mut(&mut self) -> &mut Registry<ArchetypeId, (), ()> {
        &mut self.archetypes
    }

    pub(crate) fn resources_mut(&mut self) -> &mut Registry<Name, Option<Value>, ValueState<Option<Value>>> {
        &mut self.resources
    }

    pub(crate) fn selects_mut(&mut self) -> &mut Registry<Query, Vec<Entity>, SelectState> {
        &mut self.selects
    }

    pub(crate) fn deep_mut(&mut self) -> &mut Registry<Query, DeepRows, DeepState> {
        &mut self.deep
    }

    pub(crate) fn transactions_mut(&mut self) -> &mut Registry<(), Rc<TransactionResult>, ()> {
        &mut self.transactions
    }

    /// Number of cached handles plus active observers.
    pub(crate) fn len(&self) -> usize {
        self.entities.len()
            + self.components.len()
            + self.archetypes.len()
            + self.resources.len()
            + self.selects.len()
            + self.deep.len()
            + self.transactions.len()
    }

    pub(crate) fn prune(&mut self) {
        self.entities.prune();
        self.components.prune();
        self.archetypes.prune();
        self.resources.prune();
        self.selects.prune();
        self.deep.prune();
        self.transactions.prune();
    }

    /// Works out the notifications a batch of changes causes.
    pub(crate) fn collect(&mut self, store: &Store, batch: &ChangeBatch) -> Vec<Emission> {
        let mut out: Vec<Emission> = Vec::new();
        self.collect_entities(store, batch, &mut out);
        self.collect_markers(batch, &mut out);
        self.collect_resources(store, batch, &mut out);
        self.collect_selects(store, batch, &mut out);
        self.collect_deep(store, batch, &mut out);

        for tracked in self.transactions.active.values() {
            for result in &batch.results {
                let subject = tracked.subject.clone();
                let result = Rc::clone(result);
                out.push(Box::new(move || subject.emit(result)));
            }
        }
        out
    }

    fn collect_entities(&mut self, store: &Store, batch: &ChangeBatch, out: &mut Vec<Emission>) {
        let everything = batch.reset || self.entities.active.values().any(|t| !t.state.primed);
        let targets: Vec<Entity> = if everything {
            self.entities.active.keys().copied().collect()
        } else {
            batch
                .entities
                .keys()
                .filter(|entity| self.entities.active.contains_key(entity))
                .copied()
                .collect()
        };
        for entity in targets {
            if let Some(tracked) = self.entities.get_mut(&entity) {
                let current = store.read(entity);
                if let Some(value) = refresh(&mut tracked.state, current) {
                    out.push(emit(&tracked.subject, value));
                }
            }
        }
    }

    fn collect_markers(&mut self, batch: &ChangeBatch, out: &mut Vec<Emission>) {
        for (name, tracked) in self.components.iter_mut() {
            if batch.reset || batch.components.contains(name) {
                out.push(emit(&tracked.subject, ()));
            }
        }
        for (id, tracked) in self.archetypes.iter_mut() {
            if batch.reset || batch.archetypes.contains(id) {
                out.push(emit(&tracked.subject, ()));
            }
        }
    }

    fn collect_resources(&mut self, store: &Store, batch: &ChangeBatch, out: &mut Vec<Emission>) {
        for (name, tracked) in self.resources.iter_mut() {
            if batch.reset || !tracked.state.primed || batch.components.contains(name) {
                if let Some(value) = refresh(&mut tracked.state, store.resource_get(name)) {
                    out.push(emit(&tracked.subject, value));
                }
            }
        }
    }

    fn collect_selects(&mut self, store: &Store, batch: &ChangeBatch, out: &mut Vec<Emission>) {
        for (query, tracked) in self.selects.iter_mut() {
            let state = &mut tracked.state;
            if !needs_requery(store, query, batch, &state.columns, &state.members, state.primed) {
                continue;
            }
            let result = store.select(query);
            let changed = !state.primed || result != state.result;
            state.primed = true;
            if changed {
                state.members = result.iter().copied().collect();
                state.result.clone_from(&result);
                out.push(emit(&tracked.subject, result));
            }
        }
    }

    fn collect_deep(&mut self, store: &Store, batch: &ChangeBatch, out: &mut Vec<Emission>) {
        for (query, tracked) in self.deep.iter_mut() {
            let state = &mut tracked.state;
            let touched = !batch.reset
                && state.primed
                && !state.columns.is_disjoint(&batch.components)
                && batch.entities.keys().any(|e| state.members.contains(e));
            if !touched
                && !needs_requery(store, query, batch, &state.columns, &state.members, state.primed)
            {
                continue;
            }
            let rows = deep_rows(store, query);
            let changed = !state.primed || rows != state.rows;
            state.primed = true;
            if changed {
                state.members = rows.iter().map(|(entity, _)| *entity).collect();
                state.rows.clone_from(&rows);
                out.push(emit(&tracked.subject, rows));
            }
        }
    }
}

fn emit<T: Clone + 'static>(subject: &Subject<T>, value: T) -> Emission {
    let subject = subject.clone();
    Box::new(move || subject.emit(value))
}

/// Stores a new value and returns it if it differs from the last one.
fn refresh<V: Clone + PartialEq>(state: &mut ValueState<V>, current: V) -> Option<V> {
    if state.primed && state.last == current {
        return None;
    }
    state.primed = true;
    state.last = current.clone();
    Some(current)
}

/// Decides whether a select-style observer must requery.
///
/// Skips unconditionally when the batch wrote none of the query's columns.
/// Otherwise checks each changed entity for a membership transition, or for
/// a write to an order key of a current member.
fn needs_requery(
    store: &Store,
    query: &Query,
    batch: &ChangeBatch,
    columns: &BTreeSet<Name>,
    members: &HashSet<Entity>,
    primed: bool,
) -> bool {
    if batch.reset || !primed {
        return true;
    }
    if columns.is_disjoint(&batch.components) {
        return false;
    }
    batch.entities.iter().any(|(entity, names)| {
        let was = members.contains(entity);
        let now = store.matches(*entity, query);
        if was != now {
            return true;
        }
        was && query
            .order()
            .iter()
            .any(|(key, _)| names.contains(key))
    })
}

/// Runs a query and picks each match's included values.
pub(crate) fn deep_rows(store: &Store, query: &Query) -> DeepRows {
    store
        .select(query)
        .into_iter()
        .map(|entity| (entity, pick(store, entity, query.include())))
        .collect()
}

fn pick(store: &Store, entity: Entity, include: &[Name]) -> Values {
    include
        .iter()
        .filter(|name| &***name != ID)
        .filter_map(|name| store.get(entity, name).map(|value| (name.clone(), value)))
        .collect()
}

/// Initial state for a select observer.
pub(crate) fn select_state(store: Option<&Store>, query: &Query) -> SelectState {
    let result = store.map(|store| store.select(query)).unwrap_or_default();
    SelectState {
        columns: query.columns(),
        members: result.iter().copied().collect(),
        result,
        primed: store.is_some(),
    }
}

/// Initial state for a deep select observer.
pub(crate) fn deep_state(store: Option<&Store>, query: &Query) -> DeepState {
    let rows = store.map(|store| deep_rows(store, query)).unwrap_or_default();
    DeepState {
        columns: query.columns(),
        members: rows.iter().map(|(entity, _)| *entity).collect(),
        rows,
        primed: store.is_some(),
    }
}
