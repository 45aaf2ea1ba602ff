//! Entity engine for Ember
//!
//! This crate builds the object layer on top of the revisioned store:
//! - Codec: entity values to blobs, with reference harvesting
//! - Entities: entity and binding tables, the per-transaction entity manager
//! - GC: the reference graph and the concurrent mark-sweep collector
//! - Database: configuration, task execution and retries
//!
//! The engine is the only component that knows about:
//! - How entities reference each other
//! - Which entities are roots
//! - When the collector may run

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod database;
pub mod entity;
pub mod gc;
pub mod testing;

pub use codec::{
    DirectEmbeddingCheck, MessagePackCodec, ObjectCodec, ReferenceCollector, SerializationListener,
};
pub use database::{Database, EmberConfig, GcConfig, RetryConfig, TaskContext, TransactionSettings};
pub use entity::{BindingStore, EntityIdFactory, EntityManager, EntityStore};
pub use gc::{
    CollectionReport, Color, EntityGraph, GcRunner, MarkSweepCollector, MutatorListener,
    MutatorLog, NoopMutatorListener,
};
