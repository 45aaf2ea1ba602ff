//! Mutator barrier for a running collection
//!
//! While a collection pass is active, every node named by a mutator event
//! is pinned: it is treated as live for the rest of the pass and queued so
//! the collector scans it and its references. Outside a pass events are
//! dropped.
//!
//! Once the sweep begins, a pin alone no longer protects a node: the sweep
//! may have checked it already. Writers then claim the nodes they reference
//! (see [`MutatorListener::is_sweeping`]) and the store's first-committer-wins
//! rule settles the race.

use super::listener::MutatorListener;
use ember_core::EntityId;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::trace;

#[derive(Debug, Default)]
struct LogState {
    active: bool,
    sweeping: bool,
    pinned: HashSet<EntityId>,
    /// Pinned nodes the collector has not picked up yet
    unscanned: Vec<EntityId>,
}

/// Records the nodes touched by mutators during a collection pass
#[derive(Debug, Default)]
pub struct MutatorLog {
    state: Mutex<LogState>,
}

impl MutatorLog {
    /// Create an inactive log
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording, forgetting anything from an earlier pass
    pub fn activate(&self) {
        let mut state = self.state.lock();
        state.active = true;
        state.sweeping = false;
        state.pinned.clear();
        state.unscanned.clear();
    }

    /// Stop recording and forget all pins
    pub fn deactivate(&self) {
        let mut state = self.state.lock();
        state.active = false;
        state.sweeping = false;
        state.pinned.clear();
        state.unscanned.clear();
    }

    /// True between `activate` and `deactivate`
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// True if `id` was touched during the current pass
    pub fn is_pinned(&self, id: EntityId) -> bool {
        self.state.lock().pinned.contains(&id)
    }

    /// Number of nodes pinned during the current pass
    pub fn pinned_count(&self) -> usize {
        self.state.lock().pinned.len()
    }

    /// Enter the sweep phase of the active pass
    pub fn begin_sweep(&self) {
        let mut state = self.state.lock();
        if state.active {
            state.sweeping = true;
        }
    }

    /// True if some pinned node has not been handed out yet
    pub fn has_unscanned(&self) -> bool {
        !self.state.lock().unscanned.is_empty()
    }

    /// Take the pinned nodes not handed out yet
    pub fn drain_unscanned(&self) -> Vec<EntityId> {
        std::mem::take(&mut self.state.lock().unscanned)
    }

    fn pin(&self, id: EntityId) {
        let mut state = self.state.lock();
        if state.active && state.pinned.insert(id) {
            trace!(target: "ember::gc", %id, "Pinned by mutator");
            state.unscanned.push(id);
        }
    }
}

impl MutatorListener for MutatorLog {
    fn on_entity_created(&self, id: EntityId) {
        self.pin(id);
    }

    fn on_reference_created(&self, source: Option<EntityId>, target: EntityId) {
        if let Some(source) = source {
            self.pin(source);
        }
        self.pin(target);
    }

    fn on_reference_removed(&self, source: Option<EntityId>, target: EntityId) {
        if let Some(source) = source {
            self.pin(source);
        }
        self.pin(target);
    }

    fn is_sweeping(&self) -> bool {
        self.state.lock().sweeping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_log_ignores_events() {
        let log = MutatorLog::new();
        log.on_entity_created(EntityId::new(1));
        log.on_reference_created(None, EntityId::new(2));
        assert!(!log.is_pinned(EntityId::new(1)));
        assert!(log.drain_unscanned().is_empty());
    }

    #[test]
    fn test_events_pin_both_ends() {
        let log = MutatorLog::new();
        log.activate();
        log.on_reference_created(Some(EntityId::new(1)), EntityId::new(2));
        log.on_reference_removed(None, EntityId::new(3));

        assert!(log.is_pinned(EntityId::new(1)));
        assert!(log.is_pinned(EntityId::new(2)));
        assert!(log.is_pinned(EntityId::new(3)));
        assert_eq!(log.pinned_count(), 3);
    }

    #[test]
    fn test_drain_hands_out_each_pin_once() {
        let log = MutatorLog::new();
        log.activate();
        log.on_entity_created(EntityId::new(5));
        log.on_entity_created(EntityId::new(5));

        assert_eq!(log.drain_unscanned(), vec![EntityId::new(5)]);
        log.on_reference_created(None, EntityId::new(5));
        assert!(log.drain_unscanned().is_empty());
        assert!(log.is_pinned(EntityId::new(5)));
    }

    #[test]
    fn test_activate_starts_fresh() {
        let log = MutatorLog::new();
        log.activate();
        log.on_entity_created(EntityId::new(1));
        log.deactivate();
        assert!(!log.is_active());
        assert!(!log.is_pinned(EntityId::new(1)));

        log.activate();
        assert!(log.is_active());
        assert_eq!(log.pinned_count(), 0);
    }

    #[test]
    fn test_sweep_flag_lives_within_one_pass() {
        let log = MutatorLog::new();
        log.begin_sweep();
        assert!(!log.is_sweeping());

        log.activate();
        assert!(!log.is_sweeping());
        log.begin_sweep();
        assert!(log.is_sweeping());

        log.deactivate();
        assert!(!log.is_sweeping());
        log.activate();
        assert!(!log.is_sweeping());
    }

    #[test]
    fn test_has_unscanned_until_drained() {
        let log = MutatorLog::new();
        log.activate();
        assert!(!log.has_unscanned());
        log.on_reference_created(None, EntityId::new(9));
        assert!(log.has_unscanned());
        log.drain_unscanned();
        assert!(!log.has_unscanned());
    }
}
