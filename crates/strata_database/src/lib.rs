//! Plugins, reconciling transactions, and system scheduling for Strata.
//!
//! This crate provides:
//! - [`Plugin`] - Ordered builder bundling schema, transactions, actions, and systems
//! - [`Database`] - Observed store plus named transactions run through a
//!   reconciling ledger that orders provisional and confirmed entries by time
//! - [`system_order`] - Tiered system scheduling from `before`/`after`/`during`
//! - [`UndoRedoService`] - Coalescing undo/redo history
//! - [`Replication`] - Mirrors a database into another observed store
//! - [`DatabaseData`] - Snapshots excluding provisional writes, with a
//!   `MessagePack` encoding under the `serde` feature

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod action;
pub mod config;
pub mod database;
#[cfg(feature = "serde")]
mod persist;
pub mod plugin;
pub mod reconcile;
pub mod replicate;
pub mod scheduler;
mod stream;
pub mod system;
pub mod undo;

pub use action::{ActionFn, ActionOutcome};
pub use config::{Clock, DatabaseConfig, ManualClock};
pub use database::Database;
pub use plugin::{Plugin, PluginBuilder, TransactionFn};
pub use reconcile::{AppliedEntry, DatabaseData, TransactionEnvelope};
pub use replicate::{ReplicaEvent, Replication};
pub use scheduler::{Schedule, system_order};
pub use system::{CreateSystem, LocalFuture, SystemDecl, SystemFn};
pub use undo::UndoRedoService;
