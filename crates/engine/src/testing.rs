//! Testing utilities for mutator-driven code
//!
//! [`RecordingMutatorListener`] keeps every event it receives so tests can
//! assert on the exact reference deltas a transaction produced.
//!
//! # Example
//!
//! ```ignore
//! use ember_engine::testing::{MutatorEvent, RecordingMutatorListener};
//!
//! let events = Arc::new(RecordingMutatorListener::new());
//! // ... run code that reports to `events` ...
//! assert_eq!(events.take(), vec![MutatorEvent::EntityCreated(id)]);
//! ```

use crate::gc::MutatorListener;
use ember_core::EntityId;
use parking_lot::Mutex;

/// One mutator notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutatorEvent {
    /// `on_entity_created`
    EntityCreated(EntityId),
    /// `on_reference_created`
    ReferenceCreated(Option<EntityId>, EntityId),
    /// `on_reference_removed`
    ReferenceRemoved(Option<EntityId>, EntityId),
}

/// Listener that records every event in order
#[derive(Debug, Default)]
pub struct RecordingMutatorListener {
    events: Mutex<Vec<MutatorEvent>>,
}

impl RecordingMutatorListener {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events recorded so far
    pub fn events(&self) -> Vec<MutatorEvent> {
        self.events.lock().clone()
    }

    /// Take the recorded events, leaving the recorder empty
    pub fn take(&self) -> Vec<MutatorEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl MutatorListener for RecordingMutatorListener {
    fn on_entity_created(&self, id: EntityId) {
        self.events.lock().push(MutatorEvent::EntityCreated(id));
    }

    fn on_reference_created(&self, source: Option<EntityId>, target: EntityId) {
        self.events
            .lock()
            .push(MutatorEvent::ReferenceCreated(source, target));
    }

    fn on_reference_removed(&self, source: Option<EntityId>, target: EntityId) {
        self.events
            .lock()
            .push(MutatorEvent::ReferenceRemoved(source, target));
    }
}
