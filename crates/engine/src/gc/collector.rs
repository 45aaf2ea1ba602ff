//! Concurrent tri-color mark-sweep collector
//!
//! One call to [`MarkSweepCollector::run`] is one collection pass. The pass
//! never holds a transaction for long: every batch of work is its own short
//! transaction, so application tasks keep running (and committing) while
//! the collector works.
//!
//! # Pass
//!
//! ```text
//! activate mutator log
//! handshake: wait for every transaction begun before activation
//! reset:     color every node white                      (batches)
//! mark:      gray the roots and pinned nodes, then        (batches)
//!            black a gray node and gray its white children
//!            until no gray node and no new pin is left
//! sweep:     delete white nodes that are not pinned       (batches)
//!            writers now claim the nodes they reference
//! deactivate mutator log
//! ```
//!
//! Mutators that run during the pass report every node they touch to the
//! [`MutatorLog`]. Pinned nodes are scanned like roots and never swept, so
//! a node that becomes reachable during the pass survives it. Garbage pinned
//! this way is collected by the next pass.
//!
//! A failed batch is rolled back, retried on conflicts and otherwise logged.
//! It never aborts the pass; if reset or marking was incomplete the sweep is
//! skipped.

use super::graph::{Color, EntityGraph};
use super::listener::{MutatorListener, NoopMutatorListener};
use super::mutator_log::MutatorLog;
use crate::database::Database;
use ember_core::{EntityId, Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of one collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Nodes whose color was reset to white
    pub nodes_reset: usize,
    /// Nodes found reachable and colored black
    pub nodes_marked: usize,
    /// Nodes deleted
    pub nodes_swept: usize,
    /// Nodes pinned by mutators during the pass
    pub pinned: usize,
    /// Batches that failed after all retries
    pub failed_steps: usize,
    /// True if reset or marking was incomplete, so the sweep stopped early
    pub sweep_skipped: bool,
    /// Wall time of the pass
    pub elapsed: Duration,
}

/// Mark-sweep collector over a database's entity graph
#[derive(Debug, Clone)]
pub struct MarkSweepCollector {
    db: Database,
}

impl MarkSweepCollector {
    /// Create a collector for `db`
    pub fn new(db: Database) -> Self {
        MarkSweepCollector { db }
    }

    /// Run one collection pass
    ///
    /// # Errors
    /// - `Error::IllegalState` if another pass is running on the same
    ///   database, or transactions begun before the pass did not finish
    ///   within `gc.handshake_timeout_ms`
    pub fn run(&self) -> Result<CollectionReport> {
        let Some(_running) = self.db.try_lock_collection() else {
            return Err(Error::IllegalState(
                "A collection pass is already running".to_string(),
            ));
        };
        let log = self.db.mutator_log();
        let started = Instant::now();

        log.activate();
        let outcome = self.collect(log);
        let pinned = log.pinned_count();
        log.deactivate();

        let mut report = outcome?;
        report.pinned = pinned;
        report.elapsed = started.elapsed();
        if report.sweep_skipped {
            warn!(target: "ember::gc", failed_steps = report.failed_steps, "Pass incomplete, sweep skipped");
        }
        info!(
            target: "ember::gc",
            reset = report.nodes_reset,
            marked = report.nodes_marked,
            swept = report.nodes_swept,
            pinned = report.pinned,
            failed_steps = report.failed_steps,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Collection pass finished"
        );
        Ok(report)
    }

    fn collect(&self, log: &MutatorLog) -> Result<CollectionReport> {
        let gc = &self.db.config().gc;
        let coordinator = self.db.coordinator();
        let barrier = coordinator.next_txn_id();
        if !coordinator.wait_for_transactions_before(barrier, gc.handshake_timeout()) {
            return Err(Error::IllegalState(format!(
                "Transactions begun before {} still running after {:?}",
                barrier,
                gc.handshake_timeout()
            )));
        }
        debug!(target: "ember::gc", barrier, "Handshake complete");

        let mut report = CollectionReport::default();
        if !self.reset(&mut report) {
            // a stale black node would hide its children from the mark
            report.sweep_skipped = true;
            return Ok(report);
        }

        let mut worklist = VecDeque::new();
        match self.step("roots", |graph| graph.root_nodes().collect::<Result<Vec<_>>>()) {
            Ok(roots) => worklist.extend(roots),
            Err(_) => {
                report.failed_steps += 1;
                report.sweep_skipped = true;
                return Ok(report);
            }
        }

        if self.mark(log, &mut worklist, &mut report) {
            self.sweep(log, &mut worklist, &mut report);
        } else {
            report.sweep_skipped = true;
        }
        Ok(report)
    }

    /// Color every node white
    ///
    /// Returns false if a batch failed, ending the phase early.
    fn reset(&self, report: &mut CollectionReport) -> bool {
        let batch_size = self.db.config().gc.batch_size;
        let mut cursor = None;
        loop {
            let batch = self.step("reset", |graph| {
                let nodes = batch_of(graph, cursor, batch_size)?;
                let mut reset = 0;
                for node in &nodes {
                    if graph.get_color(*node)? != Color::White {
                        graph.set_color(*node, Color::White)?;
                        reset += 1;
                    }
                }
                Ok((nodes, reset))
            });
            match batch {
                Ok((nodes, reset)) => {
                    report.nodes_reset += reset;
                    if nodes.len() < batch_size {
                        return true;
                    }
                    cursor = nodes.last().copied();
                }
                Err(_) => {
                    report.failed_steps += 1;
                    return false;
                }
            }
        }
    }

    /// Blacken everything reachable from the worklist and the pinned nodes
    ///
    /// Returns false if any batch failed.
    fn mark(
        &self,
        log: &MutatorLog,
        worklist: &mut VecDeque<EntityId>,
        report: &mut CollectionReport,
    ) -> bool {
        let batch_size = self.db.config().gc.batch_size;
        let mut complete = true;
        loop {
            worklist.extend(log.drain_unscanned());
            if worklist.is_empty() {
                return complete;
            }
            let batch: Vec<_> = worklist.drain(..batch_size.min(worklist.len())).collect();
            let outcome = self.step("mark", |graph| {
                let mut marked = 0;
                let mut grayed = Vec::new();
                for node in &batch {
                    if !graph.contains(*node)? || graph.get_color(*node)? == Color::Black {
                        continue;
                    }
                    graph.set_color(*node, Color::Black)?;
                    marked += 1;
                    for child in graph.edges_of(*node)? {
                        if graph.get_color(child)? == Color::White && graph.contains(child)? {
                            graph.set_color(child, Color::Gray)?;
                            grayed.push(child);
                        }
                    }
                }
                Ok((marked, grayed))
            });
            match outcome {
                Ok((marked, grayed)) => {
                    report.nodes_marked += marked;
                    worklist.extend(grayed);
                }
                Err(_) => {
                    report.failed_steps += 1;
                    complete = false;
                }
            }
        }
    }

    /// Delete white, unpinned nodes
    ///
    /// Nodes pinned since marking finished are marked before each batch. A
    /// batch that finds a fresh pin after choosing its victims deletes
    /// nothing and is redone after marking. Writers that reference a node
    /// after that check claim it, so the batch and the writer conflict. The
    /// phase stops at the first failed batch.
    fn sweep(
        &self,
        log: &MutatorLog,
        worklist: &mut VecDeque<EntityId>,
        report: &mut CollectionReport,
    ) {
        let batch_size = self.db.config().gc.batch_size;
        let mut cursor = None;
        log.begin_sweep();
        loop {
            if !self.mark(log, worklist, report) {
                report.sweep_skipped = true;
                return;
            }
            let batch = self.step("sweep", |graph| {
                let nodes = batch_of(graph, cursor, batch_size)?;
                let mut victims = Vec::new();
                for node in &nodes {
                    if !log.is_pinned(*node) && graph.get_color(*node)? == Color::White {
                        victims.push(*node);
                    }
                }
                if log.has_unscanned() {
                    return Ok(None);
                }
                for node in &victims {
                    graph.remove_node(*node)?;
                }
                Ok(Some((nodes.len(), nodes.last().copied(), victims.len())))
            });
            match batch {
                Ok(None) => {
                    debug!(target: "ember::gc", "Pinned during sweep batch, marking again");
                }
                Ok(Some((seen, last, swept))) => {
                    report.nodes_swept += swept;
                    if seen < batch_size {
                        return;
                    }
                    cursor = last;
                }
                Err(_) => {
                    report.failed_steps += 1;
                    return;
                }
            }
        }
    }

    /// Run `work` in its own transaction, retrying conflicts
    fn step<T, F>(&self, phase: &'static str, mut work: F) -> Result<T>
    where
        F: FnMut(&EntityGraph) -> Result<T>,
    {
        let config = self.db.config();
        let listener: Arc<dyn MutatorListener> = Arc::new(NoopMutatorListener);
        let mut attempt = 0;
        loop {
            match self
                .db
                .execute_with_listener(listener.clone(), |ctx| work(&ctx.graph()))
            {
                Err(e) if e.is_retryable() && attempt < config.gc.step_retries => {
                    debug!(target: "ember::gc", phase, attempt, error = %e, "Collector step conflicted, retrying");
                    std::thread::sleep(config.retry.delay(attempt));
                    attempt += 1;
                }
                Err(e) => {
                    error!(target: "ember::gc", phase, attempts = attempt + 1, error = %e, "Collector step failed");
                    return Err(e);
                }
                ok => return ok,
            }
        }
    }
}

fn batch_of(graph: &EntityGraph, cursor: Option<EntityId>, size: usize) -> Result<Vec<EntityId>> {
    let nodes = match cursor {
        Some(id) => graph.nodes_after(id),
        None => graph.all_nodes(),
    };
    nodes.take(size).collect()
}
