//! Plugins: composable bundles of schema and behavior.
//!
//! A plugin is built with [`Plugin::builder`], declaring its sections in a
//! fixed order: `extends`, `component`, `resource`, `archetype`,
//! `transaction`, `action`, `system`. Declaring a section after a later one
//! makes [`PluginBuilder::build`] fail with `PluginOrder`.
//!
//! Schemas merge with conflict detection: a same-name definition must be
//! identical. Same-name transactions, actions, and systems are replaced by
//! the later declaration.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use strata_foundation::{Entity, Error, ErrorKind, Name, Result, Value};
use strata_storage::{ComponentSchema, StoreSchema, Transaction};
use tracing::debug;

use crate::action::{ActionFn, ActionOutcome};
use crate::database::Database;
use crate::system::SystemDecl;

/// A transaction body. Returns the created entity as [`Value::Entity`], or
/// [`Value::Nil`].
pub type TransactionFn = Rc<dyn Fn(&mut Transaction<'_>, &Value) -> Result<Value>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Extends,
    Components,
    Resources,
    Archetypes,
    Transactions,
    Actions,
    Systems,
}

impl Section {
    fn name(self) -> &'static str {
        match self {
            Self::Extends => "extends",
            Self::Components => "components",
            Self::Resources => "resources",
            Self::Archetypes => "archetypes",
            Self::Transactions => "transactions",
            Self::Actions => "actions",
            Self::Systems => "systems",
        }
    }
}

/// A bundle of schema, transactions, actions, and systems.
#[derive(Clone, Default)]
pub struct Plugin {
    pub(crate) schema: StoreSchema,
    pub(crate) transactions: BTreeMap<Name, TransactionFn>,
    pub(crate) actions: BTreeMap<Name, ActionFn>,
    pub(crate) systems: BTreeMap<Name, SystemDecl>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("schema", &self.schema)
            .field("transactions", &self.transactions.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("systems", &self.systems)
            .finish()
    }
}

impl Plugin {
    /// Starts building a plugin.
    #[must_use]
    pub fn builder() -> PluginBuilder {
        PluginBuilder::default()
    }

    /// Returns the merged schema.
    #[must_use]
    pub fn schema(&self) -> &StoreSchema {
        &self.schema
    }

    /// Returns the declared transaction names.
    pub fn transaction_names(&self) -> impl Iterator<Item = &Name> {
        self.transactions.keys()
    }

    /// Returns the declared action names.
    pub fn action_names(&self) -> impl Iterator<Item = &Name> {
        self.actions.keys()
    }

    /// Returns the declared systems.
    #[must_use]
    pub fn systems(&self) -> &BTreeMap<Name, SystemDecl> {
        &self.systems
    }

    /// Folds another plugin into this one.
    ///
    /// # Errors
    ///
    /// Returns a schema conflict if a same-name definition differs.
    pub fn merge(&mut self, other: &Plugin) -> Result<()> {
        self.schema.merge(&other.schema)?;
        self.transactions
            .extend(other.transactions.iter().map(|(k, v)| (k.clone(), Rc::clone(v))));
        self.actions
            .extend(other.actions.iter().map(|(k, v)| (k.clone(), Rc::clone(v))));
        self.systems
            .extend(other.systems.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

/// Builder for [`Plugin`]. The first error is kept and returned by
/// [`PluginBuilder::build`].
pub struct PluginBuilder {
    plugin: Plugin,
    section: Section,
    error: Option<Error>,
}

impl Default for PluginBuilder {
    fn default() -> Self {
        Self {
            plugin: Plugin::default(),
            section: Section::Extends,
            error: None,
        }
    }
}

impl fmt::Debug for PluginBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBuilder")
            .field("plugin", &self.plugin)
            .field("section", &self.section)
            .field("error", &self.error)
            .finish()
    }
}

impl PluginBuilder {
    fn enter(&mut self, section: Section) -> bool {
        if self.error.is_some() {
            return false;
        }
        if section < self.section {
            self.error = Some(Error::new(ErrorKind::PluginOrder {
                section: section.name(),
                after: self.section.name(),
            }));
            return false;
        }
        self.section = section;
        true
    }

    fn define(&mut self, section: Section, f: impl FnOnce(StoreSchema) -> Result<StoreSchema>) {
        if !self.enter(section) {
            return;
        }
        match f(std::mem::take(&mut self.plugin.schema)) {
            Ok(schema) => self.plugin.schema = schema,
            Err(err) => self.error = Some(err),
        }
    }

    /// Includes another plugin.
    #[must_use]
    pub fn extends(mut self, plugin: &Plugin) -> Self {
        if self.enter(Section::Extends) {
            if let Err(err) = self.plugin.merge(plugin) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Declares a component.
    #[must_use]
    pub fn component(mut self, name: impl Into<Name>, schema: ComponentSchema) -> Self {
        let name = name.into();
        self.define(Section::Components, |s| s.with_component(name, schema));
        self
    }

    /// Declares a resource.
    #[must_use]
    pub fn resource(mut self, name: impl Into<Name>, schema: ComponentSchema) -> Self {
        let name = name.into();
        self.define(Section::Resources, |s| s.with_resource(name, schema));
        self
    }

    /// Declares a named archetype.
    #[must_use]
    pub fn archetype<I, N>(mut self, name: impl Into<Name>, components: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        let name = name.into();
        self.define(Section::Archetypes, |s| s.with_archetype(name, components));
        self
    }

    /// Declares a transaction.
    #[must_use]
    pub fn transaction(
        mut self,
        name: impl Into<Name>,
        f: impl Fn(&mut Transaction<'_>, &Value) -> Result<Value> + 'static,
    ) -> Self {
        if self.enter(Section::Transactions) {
            self.plugin.transactions.insert(name.into(), Rc::new(f));
        }
        self
    }

    /// Declares a transaction that returns nothing.
    #[must_use]
    pub fn transaction_void(
        self,
        name: impl Into<Name>,
        f: impl Fn(&mut Transaction<'_>, &Value) -> Result<()> + 'static,
    ) -> Self {
        self.transaction(name, move |tx, args| f(tx, args).map(|()| Value::Nil))
    }

    /// Declares a transaction that creates an entity.
    #[must_use]
    pub fn transaction_insert(
        self,
        name: impl Into<Name>,
        f: impl Fn(&mut Transaction<'_>, &Value) -> Result<Entity> + 'static,
    ) -> Self {
        self.transaction(name, move |tx, args| f(tx, args).map(Value::Entity))
    }

    /// Declares an action.
    #[must_use]
    pub fn action(
        mut self,
        name: impl Into<Name>,
        f: impl Fn(&Database, &Value) -> Result<ActionOutcome> + 'static,
    ) -> Self {
        if self.enter(Section::Actions) {
            self.plugin.actions.insert(name.into(), Rc::new(f));
        }
        self
    }

    /// Declares a system.
    #[must_use]
    pub fn system(mut self, name: impl Into<Name>, system: SystemDecl) -> Self {
        if self.enter(Section::Systems) {
            self.plugin.systems.insert(name.into(), system);
        }
        self
    }

    /// Finishes the plugin.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded while building: `PluginOrder` for
    /// out-of-order sections or `SchemaConflict` for conflicting
    /// definitions.
    pub fn build(self) -> Result<Plugin> {
        if let Some(err) = self.error {
            return Err(err);
        }
        debug!(
            components = self.plugin.schema.components.len(),
            resources = self.plugin.schema.resources.len(),
            transactions = self.plugin.transactions.len(),
            systems = self.plugin.systems.len(),
            "plugin built"
        );
        Ok(self.plugin)
    }
}
