//! Storage layer for Ember
//!
//! This crate implements the multiversion key/value store:
//! - RevisionList: newest-first revision history of one key
//! - RevisionMap: ordered multiversion table with a purge queue
//! - RevisionedStore: named tables, revision counter and commit locks
//! - Connection / DatabaseTable: snapshot-isolated transaction view
//!
//! # Isolation
//!
//! Connections get snapshot isolation. Only written keys are checked for
//! conflicts at prepare (first committer wins), so write skew is possible.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod revision_list;
pub mod revision_map;
pub mod store;

pub use connection::{Connection, DatabaseTable};
pub use revision_list::RevisionList;
pub use revision_map::RevisionMap;
pub use store::{RevisionedStore, DEFAULT_COMMIT_LOCK_WAIT, DEFAULT_TABLE};
