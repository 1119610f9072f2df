//! Entity identifiers.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier for a logical record in a store.
///
/// Identifiers are dense nonnegative integers. A store hands them out from its
/// location table and reuses the most recently freed one first, so replaying the
/// same sequence of inserts and deletes always reproduces the same identifiers.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Entity(u32);

impl Entity {
    /// Creates an entity identifier from its raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index of this entity.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Returns the raw index as a `usize`, for slot lookups.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl From<u32> for Entity {
    fn from(index: u32) -> Self {
        Self(index)
    }
}
