//! Column buffers.
//!
//! A column holds one component's values for every row of an archetype. The
//! buffer kind is picked from the component schema's storage strategy.

use strata_foundation::Value;

use crate::schema::{ComponentSchema, Storage};

/// One component's values across the rows of an archetype.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    /// All rows share one value.
    Constant {
        /// The shared value.
        value: Value,
        /// Logical row count.
        len: usize,
    },
    /// Dense numeric buffer.
    Number(Vec<f64>),
    /// Dynamic value buffer.
    Generic(Vec<Value>),
}

impl Column {
    /// Creates an empty column for a schema.
    #[must_use]
    pub fn for_schema(schema: &ComponentSchema, capacity: usize) -> Self {
        match &schema.storage {
            Storage::Constant(value) => Self::Constant {
                value: value.clone(),
                len: 0,
            },
            Storage::Number => Self::Number(Vec::with_capacity(capacity)),
            Storage::Generic => Self::Generic(Vec::with_capacity(capacity)),
        }
    }

    /// Creates an empty generic column, used for the `id` column.
    #[must_use]
    pub fn generic(capacity: usize) -> Self {
        Self::Generic(Vec::with_capacity(capacity))
    }

    /// Returns the logical row count.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Constant { len, .. } => *len,
            Self::Number(values) => values.len(),
            Self::Generic(values) => values.len(),
        }
    }

    /// Returns true if the column has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if a value can be stored without conversion loss.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Constant { value: constant, .. } => constant == value,
            Self::Number(_) => value.as_number().is_some(),
            Self::Generic(_) => true,
        }
    }

    /// Appends a value. Callers check [`Column::accepts`] first; a value the
    /// column cannot hold is stored as its nearest representation.
    pub fn push(&mut self, value: Value) {
        match self {
            Self::Constant { len, .. } => *len += 1,
            Self::Number(values) => values.push(value.as_number().unwrap_or(f64::NAN)),
            Self::Generic(values) => values.push(value),
        }
    }

    /// Overwrites the value at `row`.
    pub fn set(&mut self, row: usize, value: Value) {
        match self {
            Self::Constant { .. } => {}
            Self::Number(values) => {
                if let Some(slot) = values.get_mut(row) {
                    *slot = value.as_number().unwrap_or(f64::NAN);
                }
            }
            Self::Generic(values) => {
                if let Some(slot) = values.get_mut(row) {
                    *slot = value;
                }
            }
        }
    }

    /// Reads the value at `row`.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<Value> {
        match self {
            Self::Constant { value, len } => (row < *len).then(|| value.clone()),
            Self::Number(values) => values.get(row).map(|n| Value::Float(*n)),
            Self::Generic(values) => values.get(row).cloned(),
        }
    }

    /// Removes `row` by moving the last row into its place.
    pub fn swap_remove(&mut self, row: usize) {
        match self {
            Self::Constant { len, .. } => *len = len.saturating_sub(1),
            Self::Number(values) => {
                if row < values.len() {
                    values.swap_remove(row);
                }
            }
            Self::Generic(values) => {
                if row < values.len() {
                    values.swap_remove(row);
                }
            }
        }
    }

    /// Releases unused capacity.
    pub fn shrink_to_fit(&mut self) {
        match self {
            Self::Constant { .. } => {}
            Self::Number(values) => values.shrink_to_fit(),
            Self::Generic(values) => values.shrink_to_fit(),
        }
    }

    /// Iterates over every value in row order.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).filter_map(|row| self.get(row))
    }
}
