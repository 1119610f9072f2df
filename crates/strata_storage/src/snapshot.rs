//! Structural snapshots of a store.
//!
//! A snapshot lists every archetype in identifier order with its component
//! set, entity ids, and columns, plus the free list. Transient columns are
//! left out and restored to their schema defaults on load.

use std::collections::BTreeMap;

use strata_foundation::{Entity, Error, Name, Result, Value, Values};
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::archetype::{Archetype, ArchetypeId, ComponentSet};
use crate::column::Column;
use crate::entity::{EntityLocationTable, Location};
use crate::store::Store;

/// Snapshot of one column.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ColumnData {
    /// Constant column; the length is the archetype's row count.
    Constant(Value),
    /// Numeric buffer.
    Number(Vec<f64>),
    /// Dynamic value buffer.
    Generic(Vec<Value>),
}

impl ColumnData {
    fn from_column(column: &Column) -> Self {
        match column {
            Column::Constant { value, .. } => Self::Constant(value.clone()),
            Column::Number(values) => Self::Number(values.clone()),
            Column::Generic(values) => Self::Generic(values.clone()),
        }
    }

    fn get(&self, row: usize) -> Option<Value> {
        match self {
            Self::Constant(value) => Some(value.clone()),
            Self::Number(values) => values.get(row).map(|n| Value::Float(*n)),
            Self::Generic(values) => values.get(row).cloned(),
        }
    }
}

/// Snapshot of one archetype.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArchetypeData {
    /// Component names, excluding `id`.
    pub components: Vec<Name>,
    /// The `id` column.
    pub ids: Vec<Entity>,
    /// Persisted columns by component name.
    pub columns: BTreeMap<Name, ColumnData>,
}

/// Snapshot of a whole store.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StoreData {
    /// Archetypes in identifier order.
    pub archetypes: Vec<ArchetypeData>,
    /// Free identifiers, bottom of the stack first.
    pub free: Vec<Entity>,
}

impl StoreData {
    /// Returns the number of entities in the snapshot.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.archetypes.iter().map(|a| a.ids.len()).sum()
    }
}

impl Store {
    /// Captures a snapshot of every archetype and the free list.
    #[must_use]
    pub fn to_data(&self) -> StoreData {
        let archetypes = self
            .archetypes
            .iter()
            .map(|archetype| ArchetypeData {
                components: archetype.components().data_components().cloned().collect(),
                ids: archetype.entities().to_vec(),
                columns: archetype
                    .columns()
                    .filter(|(name, _)| !self.schema.is_transient(name))
                    .map(|(name, column)| (name.clone(), ColumnData::from_column(column)))
                    .collect(),
            })
            .collect();
        StoreData {
            archetypes,
            free: self.locations.free_list(),
        }
    }

    /// Replaces the store's contents with a snapshot.
    ///
    /// The schema is kept. Archetype identifiers and entity identifiers are
    /// restored exactly; transient columns and columns missing from the
    /// snapshot hold their schema defaults. Resources missing from the
    /// snapshot are re-created with their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot names unknown components, lists an
    /// entity twice, or its column types do not match the schema.
    pub(crate) fn load(&mut self, data: &StoreData) -> Result<()> {
        let mut archetypes = Vec::with_capacity(data.archetypes.len());
        let mut by_components = std::collections::HashMap::new();
        let mut locations = EntityLocationTable::new();

        for (index, archetype_data) in data.archetypes.iter().enumerate() {
            let id = ArchetypeId::new(
                u32::try_from(index).map_err(|_| Error::precondition("archetype table is full"))?,
            );
            let set = ComponentSet::new(archetype_data.components.iter().cloned());
            for name in set.data_components() {
                self.column_schema(name)?;
            }
            let mut archetype = Archetype::new(id, set.clone(), &self.schema, self.capacity);

            for (row, entity) in archetype_data.ids.iter().enumerate() {
                let mut values = Values::new();
                for name in set.data_components() {
                    let schema = self.column_schema(name)?;
                    let value = match archetype_data.columns.get(name) {
                        Some(column) if !schema.transient => column
                            .get(row)
                            .ok_or_else(|| Error::precondition(format!("column {name} is short")))?,
                        _ => schema.default_value(),
                    };
                    schema.validate(name, &value)?;
                    values.insert(name.clone(), value);
                }
                locations.claim(*entity, Location::new(id, row))?;
                archetype.push(*entity, &values);
            }

            if by_components.insert(set, id).is_some() {
                return Err(Error::precondition(format!(
                    "snapshot repeats the component set of {id}"
                )));
            }
            archetypes.push(archetype);
        }
        locations.restore_free_list(&data.free)?;

        self.archetypes = archetypes;
        self.by_components = by_components;
        self.locations = locations;
        self.named.clear();
        self.resources.clear();

        let named: Vec<(Name, Vec<Name>)> = self
            .schema
            .archetypes
            .iter()
            .map(|(name, list)| (name.clone(), list.clone()))
            .collect();
        for (name, components) in named {
            let id = self.ensure_archetype(components)?;
            self.named.insert(name, id);
        }

        let resource_names: Vec<Name> = self.schema.resources.keys().cloned().collect();
        for name in resource_names {
            let set = ComponentSet::new([name.clone()]);
            let entity = self
                .by_components
                .get(&set)
                .and_then(|id| self.archetype(*id))
                .and_then(|archetype| archetype.entity_at(0));
            if let Some(entity) = entity {
                self.resources.insert(name, entity);
            }
        }
        self.materialize_resources()?;

        debug!(
            archetypes = self.archetypes.len(),
            entities = self.locations.len(),
            "store loaded from snapshot"
        );
        Ok(())
    }
}
