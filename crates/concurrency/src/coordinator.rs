//! Transaction coordinator
//!
//! The coordinator hands out transactions and keeps one registry, behind a
//! single mutex, of:
//! - the transactions begun and not yet finished (for the collector
//!   handshake)
//! - lifetime counts of started, committed and aborted transactions
//!
//! Finishing a transaction wakes every thread waiting in
//! [`TransactionCoordinator::wait_for_transactions_before`].

use crate::transaction::{Transaction, TransactionStatus};
use ember_core::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest a handshake waits before rechecking for dropped transactions
const DROP_RECHECK: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Registry {
    in_flight: BTreeMap<u64, Weak<Transaction>>,
    started: u64,
    committed: u64,
    aborted: u64,
}

impl Registry {
    /// Forget transactions that were dropped or finished elsewhere
    fn prune(&mut self) {
        self.in_flight
            .retain(|_, tx| tx.upgrade().map_or(false, |tx| !tx.status().is_finished()));
    }
}

/// Transaction coordinator for the database
pub struct TransactionCoordinator {
    next_txn_id: AtomicU64,
    randomize_participant_order: bool,
    registry: Mutex<Registry>,
    finished: Condvar,
}

impl TransactionCoordinator {
    /// Create a coordinator
    ///
    /// # Arguments
    /// * `randomize_participant_order` - Shuffle participant invocation order
    ///   in every transaction it begins
    pub fn new(randomize_participant_order: bool) -> Self {
        TransactionCoordinator {
            next_txn_id: AtomicU64::new(1),
            randomize_participant_order,
            registry: Mutex::new(Registry::default()),
            finished: Condvar::new(),
        }
    }

    /// Start a new transaction
    pub fn begin(&self) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let tx = Arc::new(Transaction::new(txn_id, self.randomize_participant_order));
        {
            let mut registry = self.registry.lock();
            registry.in_flight.insert(txn_id, Arc::downgrade(&tx));
            registry.started += 1;
        }
        debug!(target: "ember::txn", txn_id, "Transaction started");
        tx
    }

    /// Id the next transaction will get
    ///
    /// Every transaction begun before this call has a smaller id.
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id.load(Ordering::SeqCst)
    }

    /// Prepare and commit a transaction
    ///
    /// If prepare fails the transaction is rolled back before the error is
    /// returned.
    ///
    /// # Errors
    /// The prepare failure (`Error::PrepareFailed`), or `Error::IllegalState`
    /// if the transaction was not active.
    pub fn commit(&self, tx: &Transaction) -> Result<()> {
        let result = tx.prepare_and_commit();
        match result {
            Ok(()) => {
                self.finish(tx, true);
                info!(target: "ember::txn", txn_id = tx.id(), "Transaction committed");
            }
            Err(ref e) => {
                if tx.status().can_rollback() {
                    if let Err(rollback_error) = tx.rollback() {
                        error!(target: "ember::txn", txn_id = tx.id(), error = %rollback_error, "Rollback after failed commit failed");
                    }
                }
                self.finish(tx, false);
                warn!(target: "ember::txn", txn_id = tx.id(), error = %e, "Transaction aborted");
            }
        }
        result
    }

    /// Roll back a transaction
    ///
    /// # Errors
    /// Returns `Error::IllegalState` if rollback is not legal in the
    /// transaction's current status.
    pub fn rollback(&self, tx: &Transaction) -> Result<()> {
        tx.rollback()?;
        self.finish(tx, false);
        info!(target: "ember::txn", txn_id = tx.id(), "Transaction rolled back");
        Ok(())
    }

    fn finish(&self, tx: &Transaction, committed: bool) {
        let mut registry = self.registry.lock();
        registry.in_flight.remove(&tx.id());
        if committed {
            registry.committed += 1;
        } else {
            registry.aborted += 1;
        }
        drop(registry);
        self.finished.notify_all();
    }

    /// Counts of the transactions begun through this coordinator
    pub fn metrics(&self) -> TransactionMetrics {
        let mut registry = self.registry.lock();
        registry.prune();
        TransactionMetrics {
            started: registry.started,
            committed: registry.committed,
            aborted: registry.aborted,
            in_flight: registry.in_flight.len() as u64,
        }
    }

    /// Wait until every transaction with an id below `txn_id` has finished
    ///
    /// A transaction counts as finished once it is committed or rolled
    /// back, or once it has been dropped. Dropped transactions are noticed
    /// within a few milliseconds.
    ///
    /// # Returns
    /// * `true` if all such transactions finished within `timeout`
    /// * `false` if the timeout expired first
    pub fn wait_for_transactions_before(&self, txn_id: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut registry = self.registry.lock();
        loop {
            registry.prune();
            let pending = registry.in_flight.range(..txn_id).count();
            if pending == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(target: "ember::txn", pending, "Timed out waiting for transactions");
                return false;
            }
            let slice = (deadline - now).min(DROP_RECHECK);
            self.finished.wait_for(&mut registry, slice);
        }
    }

    /// Status of every tracked transaction, by id
    pub fn in_flight(&self) -> Vec<(u64, TransactionStatus)> {
        self.registry
            .lock()
            .in_flight
            .iter()
            .filter_map(|(id, tx)| tx.upgrade().map(|tx| (*id, tx.status())))
            .collect()
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Point-in-time counts of a coordinator's transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// Transactions begun
    pub started: u64,
    /// Transactions committed
    pub committed: u64,
    /// Transactions rolled back, failed commits included
    pub aborted: u64,
    /// Transactions begun and neither finished nor dropped
    pub in_flight: u64,
}

impl TransactionMetrics {
    /// Committed plus aborted
    pub fn completed(&self) -> u64 {
        self.committed + self.aborted
    }

    /// Share of started transactions that committed; 0 before any start
    pub fn commit_rate(&self) -> f64 {
        ratio(self.committed, self.started)
    }

    /// Share of started transactions that aborted; 0 before any start
    pub fn abort_rate(&self) -> f64 {
        ratio(self.aborted, self.started)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
