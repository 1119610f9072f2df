//! Mirroring a database into another store.
//!
//! A [`Replication`] follows the transaction results of a [`Database`] and
//! writes the same rows and resource values into a target
//! [`ObservedStore`]. The target allocates its own identifiers, so the
//! replication keeps a source-to-target map. Entities created directly in
//! the target are never touched.
//!
//! Each source result is mirrored against the current source state inside
//! one target batch, so target observers see one notification per source
//! flush. Target writes keep the transient flag of the source result.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use strata_foundation::{Entity, Error, Name, Patch, Result, Values};
use strata_observe::{ObservedStore, Subscription};
use strata_storage::{ExecuteOptions, Store, TransactionResult};
use tracing::{debug, warn};

use crate::database::Database;

/// A write made to the target on behalf of a source entity.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplicaEvent {
    /// A source entity was inserted into the target.
    Created {
        /// Entity in the database.
        source: Entity,
        /// Its replica in the target.
        target: Entity,
        /// Values written to the replica.
        values: Values,
    },
    /// Fields of a replicated entity changed.
    Updated {
        /// Entity in the database.
        source: Entity,
        /// Its replica in the target.
        target: Entity,
        /// Changed fields; `None` marks a removed component.
        changes: Patch,
    },
    /// A source entity was deleted together with its replica.
    Deleted {
        /// Entity in the database.
        source: Entity,
        /// Its former replica in the target.
        target: Entity,
        /// Last values the replica held.
        old_values: Values,
    },
}

type Listener = Box<dyn FnMut(&ReplicaEvent)>;

struct Replica {
    target: ObservedStore,
    entities: BTreeMap<Entity, Entity>,
    values: BTreeMap<Entity, Values>,
    failures: Vec<Error>,
}

impl Replica {
    fn sync_resource(&self, source: &ObservedStore, name: &str, options: ExecuteOptions) -> Result<()> {
        let Some(value) = source.read(|store| store.resource_get(name)) else {
            return Ok(());
        };
        self.target
            .execute(options, |tx| tx.set_resource(name, value))
            .map(|_| ())
    }

    fn sync_entity(
        &mut self,
        source: &ObservedStore,
        entity: Entity,
        options: ExecuteOptions,
    ) -> Result<Option<ReplicaEvent>> {
        let Some(next) = source.read(|store| store.read(entity)) else {
            // Deleted again later in the same flush.
            return Ok(None);
        };
        let Some(&target) = self.entities.get(&entity) else {
            let target = self.target.execute(options, |tx| tx.insert(next.clone()))?.value;
            self.entities.insert(entity, target);
            self.values.insert(entity, next.clone());
            return Ok(Some(ReplicaEvent::Created {
                source: entity,
                target,
                values: next,
            }));
        };

        let changes = diff(self.values.get(&entity), &next);
        if changes.is_empty() {
            return Ok(None);
        }
        if !self.target.read(|store| store.contains(target)) {
            return Err(Error::precondition(format!(
                "replica {target} of {entity} is missing from the target"
            )));
        }
        self.target
            .execute(options, |tx| tx.update_patch(target, &changes))?;
        self.values.insert(entity, next);
        Ok(Some(ReplicaEvent::Updated {
            source: entity,
            target,
            changes,
        }))
    }

    fn remove_entity(&mut self, entity: Entity, options: ExecuteOptions) -> Result<Option<ReplicaEvent>> {
        let Some(target) = self.entities.remove(&entity) else {
            return Ok(None);
        };
        let old_values = self.values.remove(&entity).unwrap_or_default();
        if self.target.read(|store| store.contains(target)) {
            self.target
                .execute(options, |tx| tx.delete(target).map(|_| ()))?;
        }
        Ok(Some(ReplicaEvent::Deleted {
            source: entity,
            target,
            old_values,
        }))
    }

    fn mirror(&mut self, source: &ObservedStore, result: &TransactionResult) -> Vec<ReplicaEvent> {
        let options = ExecuteOptions::transient(result.transient);
        let mut events = Vec::new();
        for (&entity, change) in &result.changed_entities {
            let outcome = match source.read(|store| resource_backed_by(store, entity)) {
                Some(name) => self.sync_resource(source, &name, options).map(|()| None),
                None if change.is_none() => self.remove_entity(entity, options),
                None => self.sync_entity(source, entity, options),
            };
            match outcome {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => {
                    warn!(%entity, error = %err, "replication write failed");
                    self.failures.push(err);
                }
            }
        }
        events
    }
}

fn resource_backed_by(store: &Store, entity: Entity) -> Option<Name> {
    store
        .resources()
        .find(|&(_, backing)| backing == entity)
        .map(|(name, _)| name.clone())
}

fn diff(previous: Option<&Values>, next: &Values) -> Patch {
    let mut patch = Patch::new();
    if let Some(previous) = previous {
        for name in previous.keys().filter(|name| !next.contains_key(*name)) {
            patch.insert(name.clone(), None);
        }
    }
    for (name, value) in next {
        if previous.and_then(|previous| previous.get(name)) != Some(value) {
            patch.insert(name.clone(), Some(value.clone()));
        }
    }
    patch
}

/// Keeps a target store in step with a database.
///
/// Starting a replication copies every resource and live entity, then
/// mirrors each transaction result as it is flushed. Dropping the handle
/// stops it; the target keeps whatever was already written.
///
/// Writes that fail in the target (a missing replica, a component or
/// resource the target does not declare) do not reach the writer of the
/// source transaction. They are logged and collected for
/// [`Replication::take_failures`].
pub struct Replication {
    replica: Rc<RefCell<Replica>>,
    subscription: Option<Subscription>,
}

impl fmt::Debug for Replication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let replica = self.replica.borrow();
        f.debug_struct("Replication")
            .field("entities", &replica.entities.len())
            .field("failures", &replica.failures.len())
            .field("running", &self.subscription.is_some())
            .finish_non_exhaustive()
    }
}

impl Replication {
    /// Starts mirroring `db` into `target`.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if `target` is the database's own store,
    /// or the first error raised while copying the current state.
    pub fn start(db: &Database, target: &ObservedStore) -> Result<Self> {
        Self::start_with(db, target, |_| {})
    }

    /// Starts mirroring `db` into `target`, reporting every replica write to
    /// `listener` after it landed.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if `target` is the database's own store,
    /// or the first error raised while copying the current state.
    pub fn start_with(
        db: &Database,
        target: &ObservedStore,
        listener: impl FnMut(&ReplicaEvent) + 'static,
    ) -> Result<Self> {
        let source = db.store().clone();
        if source.ptr_eq(target) {
            return Err(Error::precondition("a database cannot replicate into its own store"));
        }
        let replica = Rc::new(RefCell::new(Replica {
            target: target.clone(),
            entities: BTreeMap::new(),
            values: BTreeMap::new(),
            failures: Vec::new(),
        }));
        let listener: Rc<RefCell<Listener>> = Rc::new(RefCell::new(Box::new(listener)));

        let events = target.batch(|| seed(&source, &mut replica.borrow_mut()))?;
        debug!(entities = events.len(), "replication started");
        report(&listener, &events);

        let mirror = Rc::clone(&replica);
        let subscription = db
            .observe_transactions()
            .subscribe(move |result: &Rc<TransactionResult>| {
                let target = mirror.borrow().target.clone();
                let events = target.batch(|| mirror.borrow_mut().mirror(&source, result));
                report(&listener, &events);
            });
        Ok(Self {
            replica,
            subscription: Some(subscription),
        })
    }

    /// Returns the replica of a source entity.
    #[must_use]
    pub fn target_of(&self, source: Entity) -> Option<Entity> {
        self.replica.borrow().entities.get(&source).copied()
    }

    /// Number of replicated entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.replica.borrow().entities.len()
    }

    /// Returns true if no entity is replicated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns and clears the target writes that failed since the last call.
    pub fn take_failures(&self) -> Vec<Error> {
        std::mem::take(&mut self.replica.borrow_mut().failures)
    }

    /// Returns true until [`Replication::stop`] is called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.subscription.is_some()
    }

    /// Stops mirroring. Calling it again does nothing.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            debug!("replication stopped");
        }
    }
}

fn seed(source: &ObservedStore, replica: &mut Replica) -> Result<Vec<ReplicaEvent>> {
    let options = ExecuteOptions::new();
    let (resources, entities) = source.read(|store| {
        let resources: Vec<Name> = store.resources().map(|(name, _)| name.clone()).collect();
        (resources, store.entities())
    });
    for name in &resources {
        replica.sync_resource(source, name, options)?;
    }
    let mut events = Vec::with_capacity(entities.len());
    for entity in entities {
        events.extend(replica.sync_entity(source, entity, options)?);
    }
    Ok(events)
}

fn report(listener: &Rc<RefCell<Listener>>, events: &[ReplicaEvent]) {
    // A listener that starts another replication step sees its events later.
    let Ok(mut listener) = listener.try_borrow_mut() else {
        return;
    };
    for event in events {
        listener(event);
    }
}
