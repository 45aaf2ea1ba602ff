//! Core types for Ember
//!
//! This crate defines the foundational types used throughout the system:
//! - Blob: Immutable byte sequence stored by the revisioned store
//! - Revision: Logical commit timestamp
//! - EntityId: Identifier of a persistent entity
//! - Value: Data model of an entity, with EntityRef handles and EntityCell objects
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;
pub mod value;

pub use error::{ConflictKind, Error, Result};
pub use types::{Blob, EntityId, Revision};
pub use value::{EntityCell, EntityRef, Value};
