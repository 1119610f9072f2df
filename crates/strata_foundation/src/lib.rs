//! Core values, entity identifiers, and error types for Strata.
//!
//! This crate provides:
//! - [`Value`] - The dynamic value type stored in component columns
//! - [`Entity`] - Entity identifiers handed out by the location table
//! - [`Type`] - Type descriptors for component schema validation
//! - [`Error`] - Rich error types with context
//! - Row aliases ([`Name`], [`Values`], [`Patch`]) and the [`values!`] macro
//! - Persistent collections ([`LtVec`], [`LtMap`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod entity;
pub mod error;
pub mod row;
pub mod types;
pub mod value;

pub use collections::{LtMap, LtVec};
pub use entity::Entity;
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use row::{Name, Patch, Values};
pub use types::Type;
pub use value::Value;
