//! EmberDB - Transactional object store with a concurrent garbage collector
//!
//! EmberDB stores application entities in a multiversion key-value store.
//! Every task runs in its own snapshot-isolated transaction; entities point
//! at each other through reference handles, and entities that are no longer
//! reachable from a named binding are reclaimed by a mark-sweep collector
//! that runs alongside application tasks.
//!
//! # Quick Start
//!
//! ```ignore
//! use emberdb::{Database, EmberConfig, EntityCell, Value};
//!
//! let db = Database::open(EmberConfig::default())?;
//!
//! // Bind a new entity under a name
//! db.execute(|ctx| ctx.bind("greeting", &EntityCell::new(Value::from("hello"))))?;
//!
//! // Read it back in a later task
//! let value = db.execute(|ctx| Ok(ctx.lookup("greeting")?.map(|cell| cell.get())))?;
//!
//! // Reclaim unreachable entities
//! let report = db.collector().run()?;
//! ```
//!
//! # Architecture
//!
//! - `ember-core`: values, ids and the error type
//! - `ember-concurrency`: two-phase commit transactions and the coordinator
//! - `ember-storage`: the revisioned store and its connections
//! - `ember-engine`: entities, bindings, the collector and `Database`

pub use ember_concurrency::{
    Transaction, TransactionCoordinator, TransactionMetrics, TransactionParticipant,
    TransactionStatus,
};
pub use ember_core::{
    Blob, ConflictKind, EntityCell, EntityId, EntityRef, Error, Result, Revision, Value,
};
pub use ember_engine::{
    BindingStore, CollectionReport, Color, Database, EmberConfig, EntityGraph, EntityManager,
    EntityStore, GcConfig, GcRunner, MarkSweepCollector, MessagePackCodec, MutatorListener,
    MutatorLog, ObjectCodec, RetryConfig, SerializationListener, TaskContext,
    TransactionSettings,
};
pub use ember_engine::database::CONFIG_FILE_NAME;
pub use ember_storage::{Connection, DatabaseTable, RevisionedStore};
