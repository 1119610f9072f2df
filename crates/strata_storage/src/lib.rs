//! Columnar archetype storage and transactional execution for Strata.
//!
//! This crate provides:
//! - [`EntityLocationTable`] - Entity to (archetype, row) mapping with id reuse
//! - [`Store`] - Archetype registry, resources, and compiled `select`
//! - [`StoreSchema`] / [`ComponentSchema`] - Schema composition with conflict checks
//! - [`Query`] - Include lists, filters, and ordering
//! - [`StoreData`] - Structural snapshots with transient-column reset
//! - [`TransactionalStore`] - Recorded execution producing [`TransactionResult`]s
//! - [`coalesce`] - Write-log simplification and result merging
//!
//! Row mutations on [`Store`] are private to this crate. Code outside it
//! writes through [`TransactionalStore::execute`] so that every change is
//! diffed and logged.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod archetype;
pub mod coalesce;
pub mod column;
pub mod entity;
pub mod query;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod transaction;

/// Name of the implicit identifier column present in every archetype.
pub const ID: &str = "id";

pub use archetype::{Archetype, ArchetypeId, ComponentSet};
pub use coalesce::{coalesce, coalesce_ops, should_coalesce};
pub use column::Column;
pub use entity::{EntityLocationTable, Location};
pub use query::{Comparison, CompiledFilter, Direction, Filter, Query};
pub use schema::{ComponentSchema, Storage, StoreSchema};
pub use snapshot::{ArchetypeData, ColumnData, StoreData};
pub use store::{DEFAULT_CAPACITY, Store};
pub use transaction::{
    ExecuteOptions, Transaction, TransactionResult, TransactionalStore, Undoable, WriteOp,
};
