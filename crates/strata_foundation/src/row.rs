//! Row-level aliases shared by every layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::value::Value;

/// Component, resource, archetype, and transaction names.
pub type Name = Arc<str>;

/// Component values of one entity, keyed by component name.
pub type Values = BTreeMap<Name, Value>;

/// A partial update: `Some` sets a component, `None` removes it.
pub type Patch = BTreeMap<Name, Option<Value>>;

/// Builds a [`Values`] map from `name => value` pairs.
///
/// ```
/// use strata_foundation::{values, Value};
///
/// let row = values! { "name" => "rover", "speed" => 2.5 };
/// assert_eq!(row.get("speed"), Some(&Value::Float(2.5)));
/// ```
#[macro_export]
macro_rules! values {
    () => {
        $crate::Values::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Values::new();
        $(
            row.insert($crate::Name::from($name), $crate::Value::from($value));
        )+
        row
    }};
}

/// Converts a full row into a patch that sets every component.
#[must_use]
pub fn patch_from(values: &Values) -> Patch {
    values
        .iter()
        .map(|(name, value)| (name.clone(), Some(value.clone())))
        .collect()
}
