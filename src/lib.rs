//! Strata - Columnar entity-component store with a reconciling database
//!
//! This crate re-exports all layers of the Strata system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: strata_database   - Plugins, reconciling transactions, scheduling, undo/redo
//! Layer 2: strata_observe    - Observable channels, incremental query observers
//! Layer 1: strata_storage    - Archetype columns, entity locations, transactions
//! Layer 0: strata_foundation - Core types (Value, Entity, Error)
//! ```

pub use strata_database as database;
pub use strata_foundation as foundation;
pub use strata_observe as observe;
pub use strata_storage as storage;

pub use strata_database::{Database, DatabaseConfig, Plugin};
pub use strata_foundation::{Entity, Error, ErrorKind, Result, Value};
