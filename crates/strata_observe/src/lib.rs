//! Change observation for Strata stores.
//!
//! This crate provides:
//! - [`Subject`] / [`Observable`] - Single-threaded channels with optional
//!   replay and activation hooks
//! - [`Subscription`] - Guard that unsubscribes on drop
//! - [`ObservedStore`] - A transactional store whose entity, component,
//!   archetype, resource, query, and transaction observers are notified
//!   incrementally after each flush
//! - [`FlushScheduler`] - Hook that defers auto-flushes so a burst of
//!   transactions is delivered as one batch

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod observable;
pub mod observed;
mod tables;

pub use observable::{Observable, Subject, Subscription};
pub use observed::{FlushScheduler, ObservedStore};
pub use tables::DeepRows;
