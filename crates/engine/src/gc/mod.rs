//! Garbage collection of unreachable entities
//!
//! - `listener`: mutator notifications fired by the entity and binding stores
//! - `mutator_log`: the barrier that pins nodes touched during a pass
//! - `graph`: the reference graph and node colors
//! - `collector`: the mark-sweep pass
//! - `runner`: periodic passes on a background thread

mod collector;
mod graph;
mod listener;
mod mutator_log;
mod runner;

pub use collector::{CollectionReport, MarkSweepCollector};
pub use graph::{Color, EntityGraph, Nodes, Roots, COLOR_METADATA};
pub use listener::{MutatorListener, NoopMutatorListener};
pub use mutator_log::MutatorLog;
pub use runner::GcRunner;
