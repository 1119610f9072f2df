//! Error types for the Strata system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//! Kinds fall into four groups: configuration errors (bad schemas, plugins, or
//! names), precondition violations (programmer errors such as replaying a log
//! against a diverged store), failures raised by transaction code, and
//! serialization failures.

use std::fmt;

use thiserror::Error;

use crate::entity::Entity;
use crate::row::Name;
use crate::types::Type;

/// The main error type for Strata operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

/// Result alias used throughout Strata.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Adds a frame to this error's context, creating the context if needed.
    #[must_use]
    pub fn in_frame(mut self, frame: impl Into<String>) -> Self {
        let context = self.context.take().unwrap_or_default();
        self.context = Some(context.with_frame(frame));
        self
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(component: impl Into<Name>, expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            component: component.into(),
            expected,
            actual,
        })
    }

    /// Creates an entity not found error.
    #[must_use]
    pub fn entity_not_found(entity: Entity) -> Self {
        Self::new(ErrorKind::EntityNotFound(entity))
    }

    /// Creates an unknown component error.
    #[must_use]
    pub fn unknown_component(name: impl Into<Name>) -> Self {
        Self::new(ErrorKind::UnknownComponent(name.into()))
    }

    /// Creates an unknown transaction error.
    #[must_use]
    pub fn unknown_transaction(name: impl Into<Name>) -> Self {
        Self::new(ErrorKind::UnknownTransaction(name.into()))
    }

    /// Creates a schema conflict error.
    #[must_use]
    pub fn schema_conflict(category: &'static str, name: impl Into<Name>) -> Self {
        Self::new(ErrorKind::SchemaConflict {
            category,
            name: name.into(),
        })
    }

    /// Creates a precondition violation error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition(message.into()))
    }

    /// Creates an error raised by transaction or action code.
    #[must_use]
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction(message.into()))
    }

    /// Returns true if this is a configuration error.
    ///
    /// Configuration errors are raised by schema composition, plugin
    /// declaration, and name lookups. They are never worth retrying.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::SchemaConflict { .. }
                | ErrorKind::PluginOrder { .. }
                | ErrorKind::UnknownComponent(_)
                | ErrorKind::UnknownResource(_)
                | ErrorKind::UnknownArchetype(_)
                | ErrorKind::UnknownTransaction(_)
                | ErrorKind::UnknownAction(_)
                | ErrorKind::UnknownSystem(_)
                | ErrorKind::ReservedComponent(_)
                | ErrorKind::CircularDependency
                | ErrorKind::UnresolvedSchedule
        )
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Same-name definition with a structurally different schema.
    #[error("conflicting {category} definition: {name}")]
    SchemaConflict {
        /// What was being defined (`component`, `resource`, `archetype`).
        category: &'static str,
        /// The conflicting name.
        name: Name,
    },

    /// A plugin declared its sections out of order.
    #[error("plugin section `{section}` declared after `{after}`")]
    PluginOrder {
        /// The section declared too late.
        section: &'static str,
        /// The section that was already declared.
        after: &'static str,
    },

    /// Component name has no registered schema.
    #[error("unknown component: {0}")]
    UnknownComponent(Name),

    /// Resource name has no registered schema.
    #[error("unknown resource: {0}")]
    UnknownResource(Name),

    /// Archetype name was never declared.
    #[error("unknown archetype: {0}")]
    UnknownArchetype(Name),

    /// Transaction name was never registered.
    #[error("unknown transaction: {0}")]
    UnknownTransaction(Name),

    /// Action name was never registered.
    #[error("unknown action: {0}")]
    UnknownAction(Name),

    /// System name referenced by a schedule was never registered.
    #[error("unknown system: {0}")]
    UnknownSystem(Name),

    /// A reserved component name (`id`) was written directly.
    #[error("reserved component: {0}")]
    ReservedComponent(Name),

    /// System ordering constraints form a cycle.
    #[error("circular dependency detected in system scheduling")]
    CircularDependency,

    /// System ordering constraints could not be resolved into tiers.
    #[error("unable to resolve system dependencies")]
    UnresolvedSchedule,

    /// Entity was not found in the store.
    #[error("entity not found: {0}")]
    EntityNotFound(Entity),

    /// Value does not match the component schema type.
    #[error("type mismatch for {component}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The component being written.
        component: Name,
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// A constant component was written with a different value.
    #[error("constant component {0} cannot change")]
    ConstantViolation(Name),

    /// Programmer error, such as replaying a log against a diverged store.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Failure raised by transaction or action code.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// An asynchronous argument source failed.
    #[error("async source failed: {0}")]
    Async(String),

    /// Snapshot encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Plugin, transaction, or system name that raised the error.
    pub source: Option<String>,
    /// Stack of named operations that were running.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source name.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "at {source}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
