//! Concurrency layer for Ember
//!
//! This crate implements the two-phase commit protocol:
//! - Transaction: status machine and joined participants
//! - TransactionParticipant: resource driven through prepare/commit/rollback
//! - TransactionCoordinator: transaction ids, in-flight tracking and metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod transaction;

pub use coordinator::{TransactionCoordinator, TransactionMetrics};
pub use transaction::{Transaction, TransactionParticipant, TransactionStatus};
