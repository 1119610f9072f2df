//! `MessagePack` encoding of database snapshots.

use strata_foundation::{Error, ErrorKind, Result};

use crate::reconcile::DatabaseData;

impl DatabaseData {
    /// Serializes the snapshot to `MessagePack` bytes.
    ///
    /// Uses named serialization to preserve struct field names.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| Error::new(ErrorKind::Serialization(e.to_string())))
    }

    /// Deserializes a snapshot from `MessagePack` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid snapshot.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::new(ErrorKind::Serialization(e.to_string())))
    }
}
