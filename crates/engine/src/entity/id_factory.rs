//! Entity id allocation

use ember_core::EntityId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out entity ids in increasing order
///
/// Ids are never reused, even when the transaction that allocated one
/// rolls back.
#[derive(Debug)]
pub struct EntityIdFactory {
    last: AtomicU64,
}

impl EntityIdFactory {
    /// Create a factory whose first id follows `largest_used`
    pub fn new(largest_used: u64) -> Self {
        EntityIdFactory {
            last: AtomicU64::new(largest_used),
        }
    }

    /// Allocate a fresh id
    pub fn new_entity_id(&self) -> EntityId {
        EntityId::new(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Largest id handed out so far
    pub fn largest_used(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for EntityIdFactory {
    fn default() -> Self {
        Self::new(0)
    }
}
