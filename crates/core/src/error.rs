//! Error types for the Ember object store
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::{Blob, EntityId, Revision};
use std::fmt;
use thiserror::Error;

/// Result type alias for Ember operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why an optimistic prepare failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The key was committed by another transaction after our snapshot
    ModifiedAfterSnapshot {
        /// Revision of the newer committed write
        committed: Revision,
        /// Snapshot revision of the failing transaction
        snapshot: Revision,
    },
    /// Another transaction has the key prepared and did not release it in time
    LockedForCommit,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::ModifiedAfterSnapshot {
                committed,
                snapshot,
            } => write!(
                f,
                "modified in revision {} after snapshot {}",
                committed, snapshot
            ),
            ConflictKind::LockedForCommit => write!(f, "locked for commit"),
        }
    }
}

/// Error types for the Ember object store
#[derive(Debug, Error)]
pub enum Error {
    /// A store operation was invoked outside an active transaction
    #[error("Transaction required: transaction is {status}")]
    TransactionRequired {
        /// Status the transaction was in
        status: String,
    },

    /// Write-write conflict detected at prepare time
    #[error("Optimistic conflict on {table}/{key:?}: {kind}")]
    OptimisticConflict {
        /// Table holding the key
        table: String,
        /// Conflicting key
        key: Blob,
        /// What kind of conflict
        kind: ConflictKind,
    },

    /// Transaction prepare failed; the transaction must be rolled back
    #[error("Transaction prepare failed: {source}")]
    PrepareFailed {
        /// Underlying participant failure
        #[source]
        source: Box<Error>,
    },

    /// Transaction was marked rollback-only
    #[error("Transaction is marked rollback-only")]
    RollbackOnly,

    /// Read of a nonexistent or deleted entity
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// An entity was embedded directly instead of through a reference
    #[error("Illegal reference embedding: {0}")]
    IllegalReferenceEmbedding(String),

    /// Invalid argument
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// State machine misuse
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Codec failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors caused by a write-write conflict
    ///
    /// Looks through `PrepareFailed` to the participant error.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::OptimisticConflict { .. } => true,
            Error::PrepareFailed { source } => source.is_conflict(),
            _ => false,
        }
    }

    /// True if rerunning the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }

    /// Wrap a participant failure raised during prepare
    pub fn prepare_failed(source: Error) -> Self {
        Error::PrepareFailed {
            source: Box::new(source),
        }
    }
}
