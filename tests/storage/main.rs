//! Integration tests for Layer 1: Storage
//!
//! Tests for archetype placement, queries, transactional execution, and snapshots.

mod queries;
mod snapshots;
