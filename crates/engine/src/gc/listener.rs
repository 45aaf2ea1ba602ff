//! Mutator notifications
//!
//! Every change to the reference graph made by an application transaction
//! is reported through a [`MutatorListener`] while the transaction runs.
//! A `source` of `None` stands for the root set (a binding).

use ember_core::EntityId;
use std::fmt;

/// Receives reference-graph changes made by transactions
pub trait MutatorListener: Send + Sync + fmt::Debug {
    /// An entity was written for the first time
    fn on_entity_created(&self, id: EntityId);

    /// `source` now references `target`
    fn on_reference_created(&self, source: Option<EntityId>, target: EntityId);

    /// `source` no longer references `target`
    fn on_reference_removed(&self, source: Option<EntityId>, target: EntityId);

    /// True while a collection pass may delete unpinned nodes
    ///
    /// Stores then also claim the target of every new reference, so a
    /// sweep deleting that target cannot commit alongside the writer.
    fn is_sweeping(&self) -> bool {
        false
    }
}

/// Listener that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMutatorListener;

impl MutatorListener for NoopMutatorListener {
    fn on_entity_created(&self, _id: EntityId) {}

    fn on_reference_created(&self, _source: Option<EntityId>, _target: EntityId) {}

    fn on_reference_removed(&self, _source: Option<EntityId>, _target: EntityId) {}
}
