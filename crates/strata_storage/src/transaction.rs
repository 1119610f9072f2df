//! Transactional execution.
//!
//! [`TransactionalStore::execute`] runs a mutator against a [`Transaction`]
//! handle. Every write made through the handle is applied to the store and
//! recorded as a forward (redo) and inverse (undo) [`WriteOp`], together with
//! the sets of changed entities, components, and archetypes. A failing
//! mutator is rolled back before its error is returned.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

use strata_foundation::{Entity, Error, ErrorKind, Name, Patch, Result, Value, Values};
use strata_foundation::row::patch_from;
use tracing::{error, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::archetype::ArchetypeId;
use crate::coalesce::{coalesce_ops, merge_change};
use crate::schema::StoreSchema;
use crate::snapshot::StoreData;
use crate::store::Store;

/// One recorded write.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WriteOp {
    /// Create `entity` with exactly these values.
    Insert {
        /// Identifier to materialize.
        entity: Entity,
        /// Full row.
        values: Values,
    },
    /// Set (`Some`) or remove (`None`) components of `entity`.
    Update {
        /// Target entity.
        entity: Entity,
        /// Partial row.
        values: Patch,
    },
    /// Remove `entity`.
    Delete {
        /// Target entity.
        entity: Entity,
    },
}

impl WriteOp {
    /// Returns the entity this operation targets.
    #[must_use]
    pub fn entity(&self) -> Entity {
        match self {
            Self::Insert { entity, .. } | Self::Update { entity, .. } | Self::Delete { entity } => {
                *entity
            }
        }
    }
}

/// Undo-history metadata attached by a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Undoable {
    /// Adjacent results with equal keys merge into one history entry.
    /// `None` never merges.
    pub coalesce: Option<Value>,
}

impl Undoable {
    /// Metadata that never merges.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata that merges with neighbours carrying the same key.
    #[must_use]
    pub fn coalescing(key: impl Into<Value>) -> Self {
        Self {
            coalesce: Some(key.into()),
        }
    }
}

/// Options for one execution.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Explicit transient flag. When unset, the transaction is transient if
    /// it touched any transient component or resource.
    pub transient: Option<bool>,
}

impl ExecuteOptions {
    /// Options with the transient flag inferred.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with an explicit transient flag.
    #[must_use]
    pub fn transient(transient: bool) -> Self {
        Self {
            transient: Some(transient),
        }
    }
}

/// Outcome of one execution: the mutator's value plus the change diff and
/// write logs.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionResult<T = ()> {
    /// Value returned by the mutator.
    pub value: T,
    /// True if the writes are not historical.
    pub transient: bool,
    /// Undo-history metadata, if the transaction asked to be undoable.
    pub undoable: Option<Undoable>,
    /// Forward log.
    pub redo: Vec<WriteOp>,
    /// Inverse log, in application order.
    pub undo: Vec<WriteOp>,
    /// Per entity: the changed fields, or `None` if it was deleted.
    pub changed_entities: BTreeMap<Entity, Option<Patch>>,
    /// Every component or resource written.
    pub changed_components: BTreeSet<Name>,
    /// Every archetype whose rows changed.
    pub changed_archetypes: BTreeSet<ArchetypeId>,
}

impl<T> TransactionResult<T> {
    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.redo.is_empty() && self.changed_entities.is_empty()
    }

    /// Copies the diff and logs, leaving the value behind.
    #[must_use]
    pub fn diff(&self) -> TransactionResult {
        TransactionResult {
            value: (),
            transient: self.transient,
            undoable: self.undoable.clone(),
            redo: self.redo.clone(),
            undo: self.undo.clone(),
            changed_entities: self.changed_entities.clone(),
            changed_components: self.changed_components.clone(),
            changed_archetypes: self.changed_archetypes.clone(),
        }
    }

    /// Drops the value, keeping the diff.
    #[must_use]
    pub fn erase(self) -> TransactionResult {
        self.map(|_| ())
    }

    /// Maps the value, keeping the diff.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TransactionResult<U> {
        TransactionResult {
            value: f(self.value),
            transient: self.transient,
            undoable: self.undoable,
            redo: self.redo,
            undo: self.undo,
            changed_entities: self.changed_entities,
            changed_components: self.changed_components,
            changed_archetypes: self.changed_archetypes,
        }
    }
}

/// Mutator handle passed to [`TransactionalStore::execute`].
///
/// Derefs to the [`Store`] for reads.
pub struct Transaction<'s> {
    store: &'s mut Store,
    redo: Vec<WriteOp>,
    undo: Vec<WriteOp>,
    changed_entities: BTreeMap<Entity, Option<Patch>>,
    changed_components: BTreeSet<Name>,
    changed_archetypes: BTreeSet<ArchetypeId>,
    undoable: Option<Undoable>,
}

impl Deref for Transaction<'_> {
    type Target = Store;

    fn deref(&self) -> &Store {
        self.store
    }
}

impl<'s> Transaction<'s> {
    fn new(store: &'s mut Store) -> Self {
        Self {
            store,
            redo: Vec::new(),
            undo: Vec::new(),
            changed_entities: BTreeMap::new(),
            changed_components: BTreeSet::new(),
            changed_archetypes: BTreeSet::new(),
            undoable: None,
        }
    }

    fn reject_resource_columns(&self, values: &Values) -> Result<()> {
        match values.keys().find(|name| self.store.schema.resource(name).is_some()) {
            Some(name) => Err(Error::precondition(format!(
                "resource {name} cannot be stored on an entity"
            ))),
            None => Ok(()),
        }
    }

    fn record_insert(&mut self, entity: Entity) {
        let values = self.store.read(entity).unwrap_or_default();
        if let Some(location) = self.store.locate(entity) {
            self.changed_archetypes.insert(location.archetype);
        }
        self.changed_components.extend(values.keys().cloned());
        merge_change(&mut self.changed_entities, entity, Some(patch_from(&values)));
        self.redo.push(WriteOp::Insert { entity, values });
        self.undo.push(WriteOp::Delete { entity });
    }

    /// Inserts a new entity.
    ///
    /// # Errors
    ///
    /// Returns an error if a component is unknown, reserved, a resource, or
    /// fails validation.
    pub fn insert(&mut self, values: Values) -> Result<Entity> {
        self.reject_resource_columns(&values)?;
        let entity = self.store.insert(values)?;
        self.record_insert(entity);
        Ok(entity)
    }

    /// Inserts a new entity into a named archetype, filling missing
    /// components with their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the archetype is unknown or the row is invalid.
    pub fn insert_into(&mut self, archetype: &str, values: Values) -> Result<Entity> {
        let values = self.store.archetype_defaults(archetype, values)?;
        self.insert(values)
    }

    fn insert_with_id(&mut self, entity: Entity, values: Values) -> Result<()> {
        self.reject_resource_columns(&values)?;
        self.store.insert_with_id(entity, values)?;
        self.record_insert(entity);
        Ok(())
    }

    /// Applies a patch to an entity. Unchanged fields are not recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not live or a value is invalid.
    pub fn update_patch(&mut self, entity: Entity, patch: &Patch) -> Result<()> {
        if let Some(name) = patch.keys().find(|name| {
            self.store.schema.resource(name).is_some()
                && self.store.resource_entity(name) != Some(entity)
        }) {
            return Err(Error::precondition(format!(
                "resource {name} cannot be stored on an entity"
            )));
        }
        let before = self
            .store
            .locate(entity)
            .ok_or_else(|| Error::entity_not_found(entity))?;
        let inverse = self.store.update(entity, patch)?;
        if inverse.is_empty() {
            return Ok(());
        }
        let forward: Patch = inverse
            .keys()
            .map(|name| (name.clone(), self.store.get(entity, name)))
            .collect();

        self.changed_archetypes.insert(before.archetype);
        if let Some(after) = self.store.locate(entity) {
            self.changed_archetypes.insert(after.archetype);
        }
        self.changed_components.extend(forward.keys().cloned());
        merge_change(&mut self.changed_entities, entity, Some(forward.clone()));
        self.redo.push(WriteOp::Update {
            entity,
            values: forward,
        });
        self.undo.push(WriteOp::Update {
            entity,
            values: inverse,
        });
        Ok(())
    }

    /// Sets components of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not live or a value is invalid.
    pub fn update(&mut self, entity: Entity, values: Values) -> Result<()> {
        self.update_patch(entity, &patch_from(&values))
    }

    /// Sets one component of an entity, adding it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not live or the value is invalid.
    pub fn set(&mut self, entity: Entity, component: &str, value: impl Into<Value>) -> Result<()> {
        let mut patch = Patch::new();
        patch.insert(Name::from(component), Some(value.into()));
        self.update_patch(entity, &patch)
    }

    /// Removes one component from an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not live.
    pub fn remove(&mut self, entity: Entity, component: &str) -> Result<()> {
        let mut patch = Patch::new();
        patch.insert(Name::from(component), None);
        self.update_patch(entity, &patch)
    }

    /// Deletes an entity and returns its last values.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not live or backs a resource.
    pub fn delete(&mut self, entity: Entity) -> Result<Values> {
        let location = self
            .store
            .locate(entity)
            .ok_or_else(|| Error::entity_not_found(entity))?;
        let values = self.store.delete(entity)?;
        self.changed_archetypes.insert(location.archetype);
        self.changed_components.extend(values.keys().cloned());
        merge_change(&mut self.changed_entities, entity, None);
        self.redo.push(WriteOp::Delete { entity });
        self.undo.push(WriteOp::Insert {
            entity,
            values: values.clone(),
        });
        Ok(values)
    }

    /// Writes a resource value.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is unknown or the value is invalid.
    pub fn set_resource(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let entity = self
            .store
            .resource_entity(name)
            .ok_or_else(|| Error::new(ErrorKind::UnknownResource(Name::from(name))))?;
        self.set(entity, name, value)
    }

    /// Returns the archetype for a component set, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a component is unknown.
    pub fn ensure_archetype<I, N>(&mut self, components: I) -> Result<ArchetypeId>
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        self.store.ensure_archetype(components)
    }

    /// Replays a write log, recording it like any other write.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the log does not fit the store, such
    /// as an update of a missing entity or an insert of a live identifier.
    pub fn apply_operations(&mut self, ops: &[WriteOp]) -> Result<()> {
        for op in ops {
            let applied = match op {
                WriteOp::Insert { entity, values } => self.insert_with_id(*entity, values.clone()),
                WriteOp::Update { entity, values } => self.update_patch(*entity, values),
                WriteOp::Delete { entity } => self.delete(*entity).map(|_| ()),
            };
            applied.map_err(|err| {
                if matches!(err.kind, ErrorKind::Precondition(_)) {
                    err
                } else {
                    Error::precondition(format!("write log does not fit the store: {err}"))
                }
            })?;
        }
        Ok(())
    }

    /// Sets the undo-history metadata of this transaction.
    pub fn set_undoable(&mut self, undoable: Option<Undoable>) {
        self.undoable = undoable;
    }

    fn finish<T>(self, value: T, transient: Option<bool>) -> TransactionResult<T> {
        let transient = transient.unwrap_or_else(|| {
            self.changed_components
                .iter()
                .any(|name| self.store.schema.is_transient(name))
        });
        let mut undo = self.undo;
        undo.reverse();
        TransactionResult {
            value,
            transient,
            undoable: self.undoable,
            redo: coalesce_ops(self.redo),
            undo: coalesce_ops(undo),
            changed_entities: self.changed_entities,
            changed_components: self.changed_components,
            changed_archetypes: self.changed_archetypes,
        }
    }

    fn rollback(self) {
        let store = self.store;
        for op in self.undo.into_iter().rev() {
            if let Err(err) = apply_raw(store, op) {
                error!(error = %err, "rollback failed; store may be inconsistent");
                return;
            }
        }
    }
}

fn apply_raw(store: &mut Store, op: WriteOp) -> Result<()> {
    match op {
        WriteOp::Insert { entity, values } => store.insert_with_id(entity, values),
        WriteOp::Update { entity, values } => store.update(entity, &values).map(|_| ()),
        WriteOp::Delete { entity } => store.delete(entity).map(|_| ()),
    }
}

/// A store whose writes all go through recorded transactions.
#[derive(Debug, Default)]
pub struct TransactionalStore {
    store: Store,
}

impl TransactionalStore {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Creates a transactional store from a schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is invalid.
    pub fn from_schema(schema: StoreSchema) -> Result<Self> {
        Ok(Self::new(Store::from_schema(schema)?))
    }

    /// Returns the store for reads.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs a mutator as one transaction.
    ///
    /// # Errors
    ///
    /// Returns the mutator's error after rolling back its writes.
    pub fn execute<T, F>(&mut self, options: ExecuteOptions, mutator: F) -> Result<TransactionResult<T>>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut tx = Transaction::new(&mut self.store);
        match mutator(&mut tx) {
            Ok(value) => {
                let result = tx.finish(value, options.transient);
                trace!(
                    redo = result.redo.len(),
                    entities = result.changed_entities.len(),
                    transient = result.transient,
                    "transaction committed"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(error = %err, writes = tx.redo.len(), "transaction rolled back");
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Adds schema definitions at runtime.
    ///
    /// # Errors
    ///
    /// Returns a schema conflict if a same-name definition differs.
    pub fn extend(&mut self, schema: &StoreSchema) -> Result<()> {
        self.store.extend(schema)
    }

    /// Captures a snapshot.
    #[must_use]
    pub fn to_data(&self) -> StoreData {
        self.store.to_data()
    }

    /// Replaces the store's contents with a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot does not fit the schema; the store is
    /// unchanged in that case.
    pub fn load(&mut self, data: &StoreData) -> Result<()> {
        self.store.load(data)
    }

    /// Releases unused storage.
    pub fn compact(&mut self) {
        self.store.compact();
    }
}
