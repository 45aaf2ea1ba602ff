//! Two-phase commit transaction
//!
//! A `Transaction` owns the set of participants that joined it and drives
//! them through prepare, commit and rollback.
//!
//! ## State Machine
//!
//! ```text
//! Active ──prepare──▶ Preparing ──ok──▶ Prepared ──commit──▶ Committing ──▶ Committed
//!   │                    │                  │
//!   │                    └──fail──▶ PrepareFailed
//!   │                                  │    │
//!   └──────────────rollback────────────┴────┴──▶ RollingBack ──▶ RolledBack
//! ```
//!
//! Participant commit and rollback failures are logged and never stop the
//! other participants from being notified. Prepare failures abort the
//! whole transaction.

use ember_core::{Error, Result};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Status of a transaction in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Transaction is executing, participants may read and write
    Active,
    /// Participants are being prepared
    Preparing,
    /// Every participant prepared successfully
    Prepared,
    /// A participant failed to prepare, or the transaction was rollback-only
    PrepareFailed,
    /// Participants are committing
    Committing,
    /// Terminal: all writes are visible
    Committed,
    /// Participants are rolling back
    RollingBack,
    /// Terminal: all writes were discarded
    RolledBack,
}

impl TransactionStatus {
    /// True for `Committed` and `RolledBack`
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack
        )
    }

    /// True if rollback is a legal transition from this status
    pub fn can_rollback(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Active
                | TransactionStatus::Prepared
                | TransactionStatus::PrepareFailed
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::Preparing => "PREPARING",
            TransactionStatus::Prepared => "PREPARED",
            TransactionStatus::PrepareFailed => "PREPARE_FAILED",
            TransactionStatus::Committing => "COMMITTING",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::RollingBack => "ROLLING_BACK",
            TransactionStatus::RolledBack => "ROLLED_BACK",
        };
        f.write_str(name)
    }
}

/// A resource that takes part in two-phase commit
///
/// Implementations must not rely on the order in which the participants of
/// one transaction are invoked.
pub trait TransactionParticipant: Send + Sync + fmt::Debug {
    /// Check that the changes can be committed and lock what they need
    fn prepare(&self) -> Result<()>;

    /// Make prepared changes visible
    fn commit(&self) -> Result<()>;

    /// Discard changes and release anything acquired in prepare
    fn rollback(&self) -> Result<()>;
}

/// A transaction coordinating its joined participants
pub struct Transaction {
    id: u64,
    status: Mutex<TransactionStatus>,
    rollback_only: AtomicBool,
    participants: Mutex<Vec<Arc<dyn TransactionParticipant>>>,
    randomize_order: bool,
}

impl Transaction {
    /// Create an active transaction
    ///
    /// With `randomize_order` the participants are invoked in a different
    /// random order for every phase.
    pub fn new(id: u64, randomize_order: bool) -> Self {
        Transaction {
            id,
            status: Mutex::new(TransactionStatus::Active),
            rollback_only: AtomicBool::new(false),
            participants: Mutex::new(Vec::new()),
            randomize_order,
        }
    }

    /// Transaction id, unique per coordinator
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    /// Check if transaction is in Active state
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// Fail with `TransactionRequired` unless the transaction is active
    pub fn must_be_active(&self) -> Result<()> {
        let status = self.status();
        if status == TransactionStatus::Active {
            Ok(())
        } else {
            Err(Error::TransactionRequired {
                status: status.to_string(),
            })
        }
    }

    /// Mark the transaction so that it can only roll back
    pub fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    /// True once `set_rollback_only` has been called
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    /// Number of joined participants
    pub fn participant_count(&self) -> usize {
        self.participants.lock().len()
    }

    /// Add a participant
    ///
    /// Joining the same participant object twice has no effect.
    ///
    /// # Errors
    /// Returns `Error::TransactionRequired` if the transaction is not active.
    pub fn join(&self, participant: Arc<dyn TransactionParticipant>) -> Result<()> {
        self.must_be_active()?;
        let mut participants = self.participants.lock();
        let joined = participants
            .iter()
            .any(|p| same_participant(p, &participant));
        if !joined {
            debug!(target: "ember::txn", txn_id = self.id, participant = ?participant, "Participant joined");
            participants.push(participant);
        }
        Ok(())
    }

    /// First phase: prepare every participant
    ///
    /// # Errors
    /// - `Error::IllegalState` if the transaction is not active
    /// - `Error::PrepareFailed` if the transaction is rollback-only or any
    ///   participant failed to prepare; the status is then `PrepareFailed`
    pub fn prepare(&self) -> Result<()> {
        self.transition(TransactionStatus::Active, TransactionStatus::Preparing)?;
        match self.prepare_participants() {
            Ok(()) => {
                self.set_status(TransactionStatus::Prepared);
                Ok(())
            }
            Err(e) => {
                self.set_status(TransactionStatus::PrepareFailed);
                debug!(target: "ember::txn", txn_id = self.id, error = %e, "Prepare failed");
                Err(Error::prepare_failed(e))
            }
        }
    }

    fn prepare_participants(&self) -> Result<()> {
        if self.is_rollback_only() {
            return Err(Error::RollbackOnly);
        }
        for participant in self.invocation_order() {
            participant.prepare()?;
        }
        // a participant may have marked us while preparing
        if self.is_rollback_only() {
            return Err(Error::RollbackOnly);
        }
        Ok(())
    }

    /// Second phase: commit every participant
    ///
    /// Participant failures are logged; the transaction still ends up
    /// `Committed`.
    ///
    /// # Errors
    /// Returns `Error::IllegalState` unless the transaction is `Prepared`.
    pub fn commit(&self) -> Result<()> {
        self.transition(TransactionStatus::Prepared, TransactionStatus::Committing)?;
        for participant in self.invocation_order() {
            if let Err(e) = participant.commit() {
                error!(target: "ember::txn", txn_id = self.id, participant = ?participant, error = %e, "Participant failed to commit");
            }
        }
        self.participants.lock().clear();
        self.set_status(TransactionStatus::Committed);
        Ok(())
    }

    /// Run both phases
    pub fn prepare_and_commit(&self) -> Result<()> {
        self.prepare()?;
        self.commit()
    }

    /// Roll back every participant
    ///
    /// Legal from `Active`, `Prepared` and `PrepareFailed`. Participant
    /// failures are logged.
    ///
    /// # Errors
    /// Returns `Error::IllegalState` from any other status.
    pub fn rollback(&self) -> Result<()> {
        {
            let mut status = self.status.lock();
            if !status.can_rollback() {
                return Err(Error::IllegalState(format!(
                    "Cannot roll back transaction {} in state {}",
                    self.id, *status
                )));
            }
            *status = TransactionStatus::RollingBack;
        }
        for participant in self.invocation_order() {
            if let Err(e) = participant.rollback() {
                error!(target: "ember::txn", txn_id = self.id, participant = ?participant, error = %e, "Participant failed to roll back");
            }
        }
        self.participants.lock().clear();
        self.set_status(TransactionStatus::RolledBack);
        Ok(())
    }

    fn invocation_order(&self) -> Vec<Arc<dyn TransactionParticipant>> {
        let mut participants = self.participants.lock().clone();
        if self.randomize_order {
            participants.shuffle(&mut rand::thread_rng());
        }
        participants
    }

    fn transition(&self, expected: TransactionStatus, next: TransactionStatus) -> Result<()> {
        let mut status = self.status.lock();
        if *status != expected {
            return Err(Error::IllegalState(format!(
                "Expected transaction {} to be {} but was {}",
                self.id, expected, *status
            )));
        }
        *status = next;
        Ok(())
    }

    fn set_status(&self, next: TransactionStatus) {
        *self.status.lock() = next;
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("rollback_only", &self.is_rollback_only())
            .field("participants", &self.participant_count())
            .finish()
    }
}

fn same_participant(a: &Arc<dyn TransactionParticipant>, b: &Arc<dyn TransactionParticipant>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
