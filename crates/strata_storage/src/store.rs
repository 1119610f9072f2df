//! The archetype store.
//!
//! `Store` owns the schema, the archetype registry, the entity location table,
//! and the resource rows. Reads are public. Row mutations are crate-private so
//! that every write outside this crate goes through
//! [`TransactionalStore::execute`](crate::TransactionalStore::execute) and is
//! recorded.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use strata_foundation::{Entity, Error, ErrorKind, Name, Patch, Result, Value, Values};
use tracing::debug;

use crate::ID;
use crate::archetype::{Archetype, ArchetypeId, ComponentSet};
use crate::entity::{EntityLocationTable, Location};
use crate::query::{CompiledFilter, Query};
use crate::schema::{ComponentSchema, Storage, StoreSchema};

/// Default column capacity for new archetypes.
pub const DEFAULT_CAPACITY: usize = 16;

/// Columnar entity/component store.
#[derive(Debug)]
pub struct Store {
    pub(crate) schema: StoreSchema,
    pub(crate) archetypes: Vec<Archetype>,
    pub(crate) by_components: HashMap<ComponentSet, ArchetypeId>,
    pub(crate) named: BTreeMap<Name, ArchetypeId>,
    pub(crate) locations: EntityLocationTable,
    pub(crate) resources: BTreeMap<Name, Entity>,
    pub(crate) capacity: usize,
    filters: Mutex<HashMap<String, Arc<CompiledFilter>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store with no schema.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: StoreSchema::new(),
            archetypes: Vec::new(),
            by_components: HashMap::new(),
            named: BTreeMap::new(),
            locations: EntityLocationTable::new(),
            resources: BTreeMap::new(),
            capacity: DEFAULT_CAPACITY,
            filters: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a store from a schema, materializing named archetypes and
    /// resource rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is invalid.
    pub fn from_schema(schema: StoreSchema) -> Result<Self> {
        Self::with_capacity(schema, DEFAULT_CAPACITY)
    }

    /// Creates a store from a schema with an initial column capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is invalid.
    pub fn with_capacity(schema: StoreSchema, capacity: usize) -> Result<Self> {
        let mut store = Self::new();
        store.capacity = capacity;
        store.extend(&schema)?;
        Ok(store)
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Returns the store's schema.
    #[must_use]
    pub fn schema(&self) -> &StoreSchema {
        &self.schema
    }

    /// Adds components, resources, and named archetypes.
    ///
    /// New resources get a row holding their default value.
    ///
    /// # Errors
    ///
    /// Returns a schema conflict if a same-name definition differs, or any
    /// validation error of the merged schema.
    pub(crate) fn extend(&mut self, schema: &StoreSchema) -> Result<()> {
        let mut merged = self.schema.clone();
        merged.merge(schema)?;
        merged.validate()?;
        self.schema = merged;

        for (name, components) in &schema.archetypes {
            let id = self.ensure_archetype(components.iter().cloned())?;
            self.named.insert(name.clone(), id);
        }
        self.materialize_resources()?;
        debug!(
            components = self.schema.components.len(),
            resources = self.schema.resources.len(),
            archetypes = self.schema.archetypes.len(),
            "store schema extended"
        );
        Ok(())
    }

    pub(crate) fn materialize_resources(&mut self) -> Result<()> {
        let missing: Vec<(Name, ComponentSchema)> = self
            .schema
            .resources
            .iter()
            .filter(|(name, _)| !self.resources.contains_key(*name))
            .map(|(name, schema)| (name.clone(), schema.clone()))
            .collect();
        for (name, schema) in missing {
            let mut row = Values::new();
            row.insert(name.clone(), schema.default_value());
            let entity = self.insert(row)?;
            self.resources.insert(name, entity);
        }
        Ok(())
    }

    /// Returns the schema of a writable column.
    ///
    /// # Errors
    ///
    /// Returns a reserved-component error for `id` and an unknown-component
    /// error for unregistered names.
    pub fn column_schema(&self, name: &str) -> Result<&ComponentSchema> {
        if name == ID {
            return Err(Error::new(ErrorKind::ReservedComponent(Name::from(ID))));
        }
        self.schema
            .column_schema(name)
            .ok_or_else(|| Error::unknown_component(name))
    }

    // =========================================================================
    // Archetypes
    // =========================================================================

    /// Returns the archetype for a component set, creating it if needed.
    ///
    /// Identity depends only on the set of names, never their order.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is not a registered component or resource.
    pub fn ensure_archetype<I, N>(&mut self, components: I) -> Result<ArchetypeId>
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        let set = ComponentSet::new(components);
        if let Some(id) = self.by_components.get(&set) {
            return Ok(*id);
        }
        for name in set.data_components() {
            self.column_schema(name)?;
        }

        let index = u32::try_from(self.archetypes.len())
            .map_err(|_| Error::precondition("archetype table is full"))?;
        let id = ArchetypeId::new(index);
        self.archetypes
            .push(Archetype::new(id, set.clone(), &self.schema, self.capacity));
        self.by_components.insert(set, id);
        Ok(id)
    }

    /// Returns an archetype by identifier.
    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.slot())
    }

    /// Returns a named archetype.
    #[must_use]
    pub fn archetype_named(&self, name: &str) -> Option<&Archetype> {
        self.named.get(name).and_then(|id| self.archetype(*id))
    }

    /// Returns the archetype currently holding an entity.
    #[must_use]
    pub fn archetype_of(&self, entity: Entity) -> Option<&Archetype> {
        self.locate(entity)
            .and_then(|location| self.archetype(location.archetype))
    }

    /// Iterates over every archetype in identifier order.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Fills in defaults for a named archetype's components missing from
    /// `values`.
    ///
    /// # Errors
    ///
    /// Returns an error if the archetype name is unknown.
    pub fn archetype_defaults(&self, archetype: &str, mut values: Values) -> Result<Values> {
        let components = self
            .schema
            .archetypes
            .get(archetype)
            .ok_or_else(|| Error::new(ErrorKind::UnknownArchetype(Name::from(archetype))))?;
        for name in components.iter().filter(|n| &***n != ID) {
            if !values.contains_key(name) {
                let default = self.column_schema(name)?.default_value();
                values.insert(name.clone(), default);
            }
        }
        Ok(values)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the location of a live entity.
    #[must_use]
    pub fn locate(&self, entity: Entity) -> Option<Location> {
        self.locations.locate(entity)
    }

    /// Checks if an entity is live.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.locations.contains(entity)
    }

    /// Reads every component of an entity, excluding `id`.
    #[must_use]
    pub fn read(&self, entity: Entity) -> Option<Values> {
        let location = self.locate(entity)?;
        self.archetype(location.archetype)?.read_row(location.row)
    }

    /// Reads one component of an entity.
    #[must_use]
    pub fn get(&self, entity: Entity, component: &str) -> Option<Value> {
        let location = self.locate(entity)?;
        self.archetype(location.archetype)?
            .get(location.row, component)
    }

    /// Returns the number of live entities, excluding resource rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len() - self.resources.len()
    }

    /// Returns true if the store holds no entities besides resource rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entities in identifier order, excluding resource rows.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        let resources: BTreeSet<Entity> = self.resources.values().copied().collect();
        self.locations
            .iter()
            .map(|(entity, _)| entity)
            .filter(|entity| !resources.contains(entity))
            .collect()
    }

    /// Returns the free list, bottom of the stack first.
    #[must_use]
    pub fn free_list(&self) -> Vec<Entity> {
        self.locations.free_list()
    }

    /// Reads a resource value.
    #[must_use]
    pub fn resource_get(&self, name: &str) -> Option<Value> {
        let entity = self.resources.get(name)?;
        self.get(*entity, name)
    }

    /// Returns the entity backing a resource.
    #[must_use]
    pub fn resource_entity(&self, name: &str) -> Option<Entity> {
        self.resources.get(name).copied()
    }

    /// Iterates over resource names and their backing entities.
    pub fn resources(&self) -> impl Iterator<Item = (&Name, Entity)> {
        self.resources.iter().map(|(name, entity)| (name, *entity))
    }

    // =========================================================================
    // Select
    // =========================================================================

    fn compiled(&self, query: &Query) -> Arc<CompiledFilter> {
        let key = query.filter_signature();
        let mut cache = self.filters.lock();
        cache
            .entry(key)
            .or_insert_with(|| Arc::new(CompiledFilter::compile(query)))
            .clone()
    }

    /// Returns the entities matching a query, in query order.
    #[must_use]
    pub fn select(&self, query: &Query) -> Vec<Entity> {
        let filter = self.compiled(query);
        let mut rows: Vec<(Entity, Vec<Option<Value>>)> = Vec::new();

        for archetype in self.archetypes.iter().filter(|a| query.matches_archetype(a)) {
            let Some(predicate) = filter.bind(archetype) else {
                continue;
            };
            for (row, entity) in archetype.entities().iter().enumerate() {
                if predicate(row) {
                    let keys = query
                        .order()
                        .iter()
                        .map(|(name, _)| archetype.get(row, name))
                        .collect();
                    rows.push((*entity, keys));
                }
            }
        }

        query.sort(&mut rows);
        rows.into_iter().map(|(entity, _)| entity).collect()
    }

    /// Checks if a single entity matches a query.
    #[must_use]
    pub fn matches(&self, entity: Entity, query: &Query) -> bool {
        let Some(location) = self.locate(entity) else {
            return false;
        };
        let Some(archetype) = self.archetype(location.archetype) else {
            return false;
        };
        if !query.matches_archetype(archetype) {
            return false;
        }
        let filter = self.compiled(query);
        filter
            .bind(archetype)
            .is_some_and(|predicate| predicate(location.row))
    }

    /// Reads an entity's order-key values for a query.
    #[must_use]
    pub fn order_keys(&self, entity: Entity, query: &Query) -> Vec<Option<Value>> {
        query
            .order()
            .iter()
            .map(|(name, _)| self.get(entity, name))
            .collect()
    }

    // =========================================================================
    // Mutation (crate-private)
    // =========================================================================

    fn normalize(&self, name: &Name, value: Value) -> Result<Value> {
        let schema = self.column_schema(name)?;
        schema.validate(name, &value)?;
        Ok(match schema.storage {
            Storage::Number => value.as_number().map_or(value, Value::Float),
            _ => value,
        })
    }

    fn normalize_row(&self, values: Values) -> Result<Values> {
        values
            .into_iter()
            .map(|(name, value)| {
                let value = self.normalize(&name, value)?;
                Ok((name, value))
            })
            .collect()
    }

    fn place(&mut self, values: &Values) -> Result<(ArchetypeId, Location)> {
        let archetype = self.ensure_archetype(values.keys().cloned())?;
        let row = self.archetypes[archetype.slot()].len();
        Ok((archetype, Location::new(archetype, row)))
    }

    /// Inserts a new entity. Returns the entity and its stored values.
    pub(crate) fn insert(&mut self, values: Values) -> Result<Entity> {
        let values = self.normalize_row(values)?;
        let (archetype, location) = self.place(&values)?;
        let entity = self.locations.create(location)?;
        self.archetypes[archetype.slot()].push(entity, &values);
        Ok(entity)
    }

    /// Re-inserts an entity under an exact identifier.
    pub(crate) fn insert_with_id(&mut self, entity: Entity, values: Values) -> Result<()> {
        let values = self.normalize_row(values)?;
        let (archetype, location) = self.place(&values)?;
        self.locations.claim(entity, location)?;
        self.archetypes[archetype.slot()].push(entity, &values);
        Ok(())
    }

    /// Applies a patch and returns its inverse.
    ///
    /// Only fields whose value actually changes appear in the inverse; `None`
    /// in the inverse means the component was absent. Adding or removing a
    /// component moves the row to another archetype.
    pub(crate) fn update(&mut self, entity: Entity, patch: &Patch) -> Result<Patch> {
        let location = self
            .locate(entity)
            .ok_or_else(|| Error::entity_not_found(entity))?;
        let archetype = &self.archetypes[location.archetype.slot()];

        let mut inverse = Patch::new();
        let mut forward = Patch::new();
        for (name, value) in patch {
            let current = archetype.get(location.row, name);
            match value {
                Some(value) => {
                    let value = self.normalize(name, value.clone())?;
                    if current.as_ref() != Some(&value) {
                        inverse.insert(name.clone(), current);
                        forward.insert(name.clone(), Some(value));
                    }
                }
                None => {
                    if &**name == ID {
                        return Err(Error::new(ErrorKind::ReservedComponent(name.clone())));
                    }
                    if current.is_some() {
                        if self.resources.get(name) == Some(&entity) {
                            return Err(Error::precondition(format!(
                                "resource {name} cannot be removed"
                            )));
                        }
                        inverse.insert(name.clone(), current);
                        forward.insert(name.clone(), None);
                    }
                }
            }
        }
        if forward.is_empty() {
            return Ok(inverse);
        }

        let moves = forward
            .iter()
            .any(|(name, value)| value.is_none() || !archetype.has(name));
        if moves {
            let mut row = archetype.read_row(location.row).unwrap_or_default();
            for (name, value) in &forward {
                match value {
                    Some(value) => row.insert(name.clone(), value.clone()),
                    None => row.remove(name),
                };
            }
            self.remove_row(location)?;
            let (target, new_location) = self.place(&row)?;
            self.archetypes[target.slot()].push(entity, &row);
            self.locations.relocate(entity, new_location)?;
        } else {
            let archetype = &mut self.archetypes[location.archetype.slot()];
            for (name, value) in forward {
                if let Some(value) = value {
                    archetype.set(location.row, &name, value);
                }
            }
        }
        Ok(inverse)
    }

    /// Deletes an entity and returns its last values.
    pub(crate) fn delete(&mut self, entity: Entity) -> Result<Values> {
        if self.resources.values().any(|e| *e == entity) {
            return Err(Error::precondition(format!(
                "{entity} backs a resource and cannot be deleted"
            )));
        }
        let location = self.locations.delete(entity)?;
        let values = self.archetypes[location.archetype.slot()]
            .read_row(location.row)
            .unwrap_or_default();
        self.remove_row(location)?;
        Ok(values)
    }

    /// Swap-removes a row and fixes the location of the row moved into it.
    fn remove_row(&mut self, location: Location) -> Result<()> {
        match self.archetypes[location.archetype.slot()].swap_remove(location.row) {
            Some(moved) => self.locations.relocate(moved, location),
            None => Ok(()),
        }
    }

    /// Writes a resource value. Returns the previous value if it changed.
    pub(crate) fn resource_set(&mut self, name: &str, value: Value) -> Result<Option<Value>> {
        let entity = self
            .resource_entity(name)
            .ok_or_else(|| Error::new(ErrorKind::UnknownResource(Name::from(name))))?;
        let mut patch = Patch::new();
        patch.insert(Name::from(name), Some(value));
        let inverse = self.update(entity, &patch)?;
        Ok(inverse.into_values().next().flatten())
    }

    /// Releases unused storage and trims trailing free identifiers.
    ///
    /// Live identifiers never change.
    pub(crate) fn compact(&mut self) {
        for archetype in &mut self.archetypes {
            archetype.shrink_to_fit();
        }
        self.locations.compact();
        self.filters.lock().clear();
        debug!(entities = self.locations.len(), "store compacted");
    }
}
