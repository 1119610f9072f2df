//! Integration tests for Layer 3: Database
//!
//! Tests for plugins, reconciliation, systems, async sources, and undo history.

mod history;
mod plugins;
mod reconciliation;
mod sources;
mod systems;
