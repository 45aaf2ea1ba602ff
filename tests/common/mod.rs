//! Shared test utilities for the scenario suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::Once;

pub use emberdb::{
    Blob, CollectionReport, Database, EmberConfig, EntityCell, EntityId, EntityRef, Error,
    RetryConfig, Value,
};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route engine logs through the test harness
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

// ============================================================================
// Database helpers
// ============================================================================

/// Database with the default configuration
pub fn open_db() -> Database {
    init_tracing();
    Database::open(EmberConfig::default()).expect("open db")
}

/// Database whose collector works in batches of `batch_size` nodes
pub fn open_db_with_batch(batch_size: usize) -> Database {
    init_tracing();
    let mut config = EmberConfig::default();
    config.gc.batch_size = batch_size;
    Database::open(config).expect("open db")
}

/// Whether the entity is still stored
pub fn entity_exists(db: &Database, id: EntityId) -> bool {
    db.execute(|ctx| ctx.entity_store().exists(id))
        .expect("exists")
}

/// Number of stored entities
pub fn entity_count(db: &Database) -> usize {
    db.execute(|ctx| Ok(ctx.graph().all_nodes().count()))
        .expect("count")
}

/// Reference value pointing at `cell`
pub fn reference(cell: &EntityCell) -> Value {
    Value::Ref(EntityRef::to(cell))
}

/// Register an entity without binding it
pub fn register(db: &Database, cell: &EntityCell) -> EntityId {
    db.execute(|ctx| ctx.entities().get_entity_id(cell))
        .expect("register")
}

/// Bind a fresh entity holding `value` under `name`
pub fn bind_value(db: &Database, name: &str, value: Value) -> EntityId {
    db.execute(|ctx| ctx.bind(name, &EntityCell::new(value)))
        .expect("bind")
}

/// Read the value bound under `name`
pub fn bound_value(db: &Database, name: &str) -> Option<Value> {
    db.execute(|ctx| Ok(ctx.lookup(name)?.map(|cell| cell.get())))
        .expect("lookup")
}

/// Run one collection pass
pub fn collect(db: &Database) -> CollectionReport {
    db.collector().run().expect("collection pass")
}
