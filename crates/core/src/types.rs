//! Core types for the Ember object store
//!
//! This module defines the foundational types:
//! - Blob: Immutable byte sequence, the universal key and value type
//! - Revision: Logical commit timestamp
//! - EntityId: Identifier of a persistent entity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Logical timestamp assigned to a committed transaction
///
/// Incremented exactly once per commit. Every stored value is tagged with
/// the revision that wrote it.
pub type Revision = u64;

/// Immutable byte sequence
///
/// Keys and values of the revisioned store are both blobs. The empty blob
/// is the tombstone: reading a missing or deleted key returns it.
///
/// Cloning is O(1); the bytes are shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Blob(Arc<[u8]>);

impl Blob {
    /// The empty blob (absent/deleted value)
    pub fn empty() -> Self {
        Blob(Arc::from(Vec::new()))
    }

    /// Create a blob that takes ownership of the bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Blob(Arc::from(bytes))
    }

    /// Create a blob by copying a slice
    pub fn from_slice(bytes: &[u8]) -> Self {
        Blob(Arc::from(bytes))
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the tombstone
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check whether this blob begins with `prefix`
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl Default for Blob {
    fn default() -> Self {
        Blob::empty()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob::new(bytes)
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Blob::from_slice(bytes)
    }
}

impl From<&str> for Blob {
    fn from(s: &str) -> Self {
        Blob::from_slice(s.as_bytes())
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "Blob({:?})", s),
            _ => {
                write!(f, "Blob(0x")?;
                for b in self.0.iter() {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Identifier of a persistent entity
///
/// Allocated monotonically when an entity is first registered and never
/// reused for the lifetime of the store.
///
/// The key encoding is 8 bytes big-endian, so the byte order of encoded
/// ids matches their numeric order and ordered key iteration visits
/// entities by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Length of the key encoding
    pub const ENCODED_LEN: usize = 8;

    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        EntityId(id)
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id that follows this one
    pub fn next(&self) -> EntityId {
        EntityId(self.0 + 1)
    }

    /// Encode as a store key
    pub fn to_blob(&self) -> Blob {
        Blob::new(self.0.to_be_bytes().to_vec())
    }

    /// Decode a store key produced by [`EntityId::to_blob`]
    ///
    /// # Errors
    ///
    /// Returns `Error::IllegalArgument` if the blob is not exactly 8 bytes.
    pub fn from_blob(blob: &Blob) -> Result<EntityId> {
        let bytes: [u8; Self::ENCODED_LEN] = blob.as_bytes().try_into().map_err(|_| {
            Error::IllegalArgument(format!("not an entity id: {:?}", blob))
        })?;
        Ok(EntityId(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}
