//! Integration tests across all layers
//!
//! Tests end-to-end scenarios through the `strata` facade: predicted moves
//! reconciled against confirmations, persisted sessions, and an editor loop
//! combining systems with undo history.

mod editor;
mod persistence;
mod prediction;
