//! Integration tests for Layer 2: Observation
//!
//! Tests for channels, store observers, and notification batching.

mod store_observers;
