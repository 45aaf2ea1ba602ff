//! Scenario Tests
//!
//! End-to-end behavior through the `emberdb` facade:
//! - Tasks: raw tables, rollback, isolation between tasks
//! - Entities: bindings and reference graphs across tasks
//! - Collection: reachability, concurrent mutators, the background runner
//! - Configuration: files, validation, effect on the engine

#[path = "../common/mod.rs"]
mod common;

mod collection;
mod config;
mod entities;
mod tasks;
