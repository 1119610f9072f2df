//! Schema definitions for components, resources, and named archetypes.
//!
//! Schemas define the type, default value, persistence, and column storage of
//! each component. Two schemas with the same name must be structurally
//! identical; composing conflicting definitions fails when schemas are merged,
//! never later during a mutation.

use std::collections::BTreeMap;

use strata_foundation::{Error, ErrorKind, Name, Result, Type, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a component's column stores its values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Storage {
    /// Every row holds the same value; only a length is stored.
    Constant(Value),
    /// Dense `f64` buffer.
    Number,
    /// Buffer of dynamic values.
    Generic,
}

/// Schema definition for a component or resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComponentSchema {
    /// Declared value type.
    pub ty: Type,
    /// Value used when a row is created without this component's value, or
    /// when a transient column is restored from a snapshot.
    pub default: Option<Value>,
    /// If true, values are never persisted and writes are not historical.
    pub transient: bool,
    /// Column storage strategy.
    pub storage: Storage,
}

impl ComponentSchema {
    /// Creates a schema for the given type.
    ///
    /// `float` components get a numeric buffer, everything else a generic one.
    #[must_use]
    pub fn new(ty: Type) -> Self {
        let storage = if ty == Type::Float {
            Storage::Number
        } else {
            Storage::Generic
        };
        Self {
            ty,
            default: None,
            transient: false,
            storage,
        }
    }

    /// Creates a constant schema. Every row holds `value`.
    #[must_use]
    pub fn constant(value: Value) -> Self {
        Self {
            ty: value.value_type(),
            default: Some(value.clone()),
            transient: false,
            storage: Storage::Constant(value),
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Marks this component as transient.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Overrides the column storage strategy.
    #[must_use]
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    /// Returns the value a freshly created row holds.
    ///
    /// Falls back to zero for numeric storage and nil otherwise when no default
    /// is declared.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match (&self.storage, &self.default) {
            (Storage::Constant(value), _) | (_, Some(value)) => value.clone(),
            (Storage::Number, None) => Value::Float(0.0),
            (Storage::Generic, None) => Value::Nil,
        }
    }

    /// Validates a value against this schema.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch if the value does not conform to the declared
    /// type, or a constant violation if a constant component is written with a
    /// different value.
    pub fn validate(&self, component: &Name, value: &Value) -> Result<()> {
        if let Storage::Constant(constant) = &self.storage {
            if constant != value {
                return Err(Error::new(ErrorKind::ConstantViolation(component.clone())));
            }
            return Ok(());
        }
        if let Storage::Number = self.storage {
            if value.as_number().is_none() {
                return Err(Error::type_mismatch(
                    component.clone(),
                    Type::Float,
                    value.value_type(),
                ));
            }
        }
        if value.conforms_to(&self.ty) {
            Ok(())
        } else {
            Err(Error::type_mismatch(
                component.clone(),
                self.ty.clone(),
                value.value_type(),
            ))
        }
    }
}

/// Complete schema of a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StoreSchema {
    /// Component schemas by name.
    pub components: BTreeMap<Name, ComponentSchema>,
    /// Resource schemas by name.
    pub resources: BTreeMap<Name, ComponentSchema>,
    /// Named archetypes: name to component list.
    pub archetypes: BTreeMap<Name, Vec<Name>>,
}

impl StoreSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a component.
    ///
    /// # Errors
    ///
    /// Returns a schema conflict if the name is already defined differently.
    pub fn with_component(mut self, name: impl Into<Name>, schema: ComponentSchema) -> Result<Self> {
        define(&mut self.components, "component", name.into(), schema)?;
        Ok(self)
    }

    /// Adds a resource.
    ///
    /// # Errors
    ///
    /// Returns a schema conflict if the name is already defined differently.
    pub fn with_resource(mut self, name: impl Into<Name>, schema: ComponentSchema) -> Result<Self> {
        define(&mut self.resources, "resource", name.into(), schema)?;
        Ok(self)
    }

    /// Adds a named archetype.
    ///
    /// # Errors
    ///
    /// Returns a schema conflict if the name is already defined with a
    /// different component set.
    pub fn with_archetype<I, N>(mut self, name: impl Into<Name>, components: I) -> Result<Self>
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        let mut list: Vec<Name> = components.into_iter().map(Into::into).collect();
        list.sort();
        list.dedup();
        define(&mut self.archetypes, "archetype", name.into(), list)?;
        Ok(self)
    }

    /// Merges another schema into this one.
    ///
    /// Identical same-name definitions are accepted; differing ones fail.
    ///
    /// # Errors
    ///
    /// Returns a schema conflict naming the first differing definition.
    pub fn merge(&mut self, other: &StoreSchema) -> Result<()> {
        for (name, schema) in &other.components {
            define(&mut self.components, "component", name.clone(), schema.clone())?;
        }
        for (name, schema) in &other.resources {
            define(&mut self.resources, "resource", name.clone(), schema.clone())?;
        }
        for (name, list) in &other.archetypes {
            define(&mut self.archetypes, "archetype", name.clone(), list.clone())?;
        }
        Ok(())
    }

    /// Checks that every named archetype only references known components, that
    /// no definition uses the reserved `id` name, and that no resource shares a
    /// name with a component.
    ///
    /// # Errors
    ///
    /// Returns an unknown-component, reserved-component, or schema-conflict
    /// error.
    pub fn validate(&self) -> Result<()> {
        for name in self.components.keys().chain(self.resources.keys()) {
            if &**name == crate::ID {
                return Err(Error::new(ErrorKind::ReservedComponent(name.clone())));
            }
        }
        if let Some(name) = self.resources.keys().find(|n| self.components.contains_key(*n)) {
            return Err(Error::schema_conflict("resource", name.clone()));
        }
        for list in self.archetypes.values() {
            for component in list {
                if &**component != crate::ID && !self.components.contains_key(component) {
                    return Err(Error::unknown_component(component.clone()));
                }
            }
        }
        Ok(())
    }

    /// Returns a component's schema.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentSchema> {
        self.components.get(name)
    }

    /// Returns a resource's schema.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ComponentSchema> {
        self.resources.get(name)
    }

    /// Returns the schema of a column, component or resource.
    #[must_use]
    pub fn column_schema(&self, name: &str) -> Option<&ComponentSchema> {
        self.component(name).or_else(|| self.resource(name))
    }

    /// Checks if writes to a column are transient.
    #[must_use]
    pub fn is_transient(&self, name: &str) -> bool {
        self.column_schema(name).is_some_and(|schema| schema.transient)
    }
}

fn define<T: PartialEq>(
    table: &mut BTreeMap<Name, T>,
    category: &'static str,
    name: Name,
    definition: T,
) -> Result<()> {
    match table.get(&name) {
        Some(existing) if *existing != definition => Err(Error::schema_conflict(category, name)),
        Some(_) => Ok(()),
        None => {
            table.insert(name, definition);
            Ok(())
        }
    }
}
