//! Archetypes: fixed component sets stored as columnar tables.

use std::collections::BTreeMap;
use std::fmt;

use strata_foundation::{Entity, Name, Value, Values};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ID;
use crate::column::Column;
use crate::schema::StoreSchema;

/// Identifier of an archetype within one store.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// Creates an archetype identifier from its raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Returns the index as a table offset.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Archetype({})", self.0)
    }
}

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Archetype({})", self.0)
    }
}

/// Canonical set of component names, always including `id`.
///
/// Sorted and deduplicated, so two sets built from the same names in any
/// order compare equal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComponentSet(Vec<Name>);

impl ComponentSet {
    /// Builds a canonical set from component names.
    pub fn new<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        let mut names: Vec<Name> = names.into_iter().map(Into::into).collect();
        names.push(Name::from(ID));
        names.sort();
        names.dedup();
        Self(names)
    }

    /// Returns the names in canonical order.
    #[must_use]
    pub fn names(&self) -> &[Name] {
        &self.0
    }

    /// Checks if a component is in the set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.binary_search_by(|n| (**n).cmp(name)).is_ok()
    }

    /// Checks if every name in `names` is in the set.
    pub fn contains_all<'a>(&self, names: impl IntoIterator<Item = &'a Name>) -> bool {
        names.into_iter().all(|n| self.contains(n))
    }

    /// Returns the number of components, including `id`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: `id` is a member of every set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over component names, excluding `id`.
    pub fn data_components(&self) -> impl Iterator<Item = &Name> {
        self.0.iter().filter(|n| &***n != ID)
    }
}

/// A columnar table holding every entity with exactly one component set.
///
/// Row `r` of every column describes the entity at `ids[r]`. Rows are dense;
/// removing a row moves the last row into the gap.
#[derive(Clone, Debug)]
pub struct Archetype {
    id: ArchetypeId,
    components: ComponentSet,
    ids: Vec<Entity>,
    columns: BTreeMap<Name, Column>,
}

impl Archetype {
    /// Creates an empty archetype with one column per component.
    pub(crate) fn new(
        id: ArchetypeId,
        components: ComponentSet,
        schema: &StoreSchema,
        capacity: usize,
    ) -> Self {
        let columns = components
            .data_components()
            .map(|name| {
                let column = schema.column_schema(name).map_or_else(
                    || Column::generic(capacity),
                    |schema| Column::for_schema(schema, capacity),
                );
                (name.clone(), column)
            })
            .collect();
        Self {
            id,
            components,
            ids: Vec::with_capacity(capacity),
            columns,
        }
    }

    /// Returns this archetype's identifier.
    #[must_use]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Returns the component set.
    #[must_use]
    pub fn components(&self) -> &ComponentSet {
        &self.components
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Checks if the archetype has a component.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.components.contains(name)
    }

    /// Returns the `id` column.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.ids
    }

    /// Returns the entity stored at `row`.
    #[must_use]
    pub fn entity_at(&self, row: usize) -> Option<Entity> {
        self.ids.get(row).copied()
    }

    /// Returns a column by component name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Iterates over the data columns in name order.
    pub fn columns(&self) -> impl Iterator<Item = (&Name, &Column)> {
        self.columns.iter()
    }

    /// Reads one cell. `id` reads the row's entity.
    #[must_use]
    pub fn get(&self, row: usize, name: &str) -> Option<Value> {
        if name == ID {
            return self.entity_at(row).map(Value::Entity);
        }
        self.columns.get(name)?.get(row)
    }

    /// Reads a full row, excluding `id`.
    #[must_use]
    pub fn read_row(&self, row: usize) -> Option<Values> {
        if row >= self.len() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .filter_map(|(name, column)| column.get(row).map(|v| (name.clone(), v)))
                .collect(),
        )
    }

    /// Appends a row. `values` must hold a value for every data column;
    /// missing ones are stored as nil.
    pub(crate) fn push(&mut self, entity: Entity, values: &Values) -> usize {
        let row = self.ids.len();
        self.ids.push(entity);
        for (name, column) in &mut self.columns {
            column.push(values.get(name).cloned().unwrap_or(Value::Nil));
        }
        row
    }

    /// Overwrites one cell.
    pub(crate) fn set(&mut self, row: usize, name: &str, value: Value) {
        if let Some(column) = self.columns.get_mut(name) {
            column.set(row, value);
        }
    }

    /// Removes a row, moving the last row into its place.
    ///
    /// Returns the entity that now occupies `row`, if a row was moved.
    pub(crate) fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        if row >= self.ids.len() {
            return None;
        }
        self.ids.swap_remove(row);
        for column in self.columns.values_mut() {
            column.swap_remove(row);
        }
        self.ids.get(row).copied()
    }

    /// Releases unused column capacity.
    pub(crate) fn shrink_to_fit(&mut self) {
        self.ids.shrink_to_fit();
        for column in self.columns.values_mut() {
            column.shrink_to_fit();
        }
    }
}
