//! Database: the public entry point of the engine
//!
//! A `Database` owns the revisioned store, the transaction coordinator, the
//! entity codec and id allocator, and the mutator log shared with the
//! collector. Application code runs as tasks:
//!
//! ```text
//! execute(f):  begin ──> open connection ──> f(&ctx) ──> flush entities ──> check bindings ──> commit
//!                                               │              │                  │              │
//!                                               └──── error ───┴──────────────────┴──> rollback ─┘
//! ```
//!
//! `Database` is a cheap handle; clones share the same engine.

pub mod config;
mod context;
pub mod transactions;

pub use config::{EmberConfig, GcConfig, TransactionSettings, CONFIG_FILE_NAME};
pub use context::TaskContext;
pub use transactions::RetryConfig;

use crate::codec::{MessagePackCodec, ObjectCodec};
use crate::entity::EntityIdFactory;
use crate::gc::{GcRunner, MarkSweepCollector, MutatorListener, MutatorLog};
use ember_concurrency::TransactionCoordinator;
use ember_core::{Error, Result};
use ember_storage::RevisionedStore;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

struct DatabaseInner {
    store: Arc<RevisionedStore>,
    coordinator: Arc<TransactionCoordinator>,
    codec: Arc<dyn ObjectCodec>,
    ids: Arc<EntityIdFactory>,
    mutator_log: Arc<MutatorLog>,
    config: EmberConfig,
    /// Held for the duration of a collection pass
    collection_lock: Mutex<()>,
}

/// Transactional entity database
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Open an empty database with the MessagePack codec
    ///
    /// # Errors
    /// Returns `Error::Config` if `config` fails validation.
    pub fn open(config: EmberConfig) -> Result<Self> {
        Self::with_codec(config, Arc::new(MessagePackCodec))
    }

    /// Open an empty database with a custom entity codec
    pub fn with_codec(config: EmberConfig, codec: Arc<dyn ObjectCodec>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(RevisionedStore::with_commit_lock_wait(
            config.transaction.commit_lock_wait(),
        ));
        let coordinator = Arc::new(TransactionCoordinator::new(
            config.transaction.randomize_participant_order,
        ));
        info!(
            target: "ember::txn",
            randomize = config.transaction.randomize_participant_order,
            batch_size = config.gc.batch_size,
            "Database opened"
        );
        Ok(Database {
            inner: Arc::new(DatabaseInner {
                store,
                coordinator,
                codec,
                ids: Arc::new(EntityIdFactory::default()),
                mutator_log: Arc::new(MutatorLog::new()),
                config,
                collection_lock: Mutex::new(()),
            }),
        })
    }

    /// Run `task` in a new transaction and commit it
    ///
    /// Entities registered with the task's entity manager are written after
    /// `task` returns. On any error the transaction is rolled back and the
    /// error returned; nothing the task wrote becomes visible.
    ///
    /// # Errors
    /// - the task's own error
    /// - `Error::EntityNotFound` if the task bound a name to a missing entity
    /// - `Error::PrepareFailed` if commit failed (see `Error::is_conflict`)
    pub fn execute<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&TaskContext) -> Result<T>,
    {
        self.execute_with_listener(self.inner.mutator_log.clone(), task)
    }

    /// Run `task` like [`execute`](Self::execute), rerunning it on conflicts
    ///
    /// The task must be safe to run more than once.
    pub fn execute_with_retry<T, F>(&self, config: &RetryConfig, mut task: F) -> Result<T>
    where
        F: FnMut(&TaskContext) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match self.execute(&mut task) {
                Err(e) if e.is_retryable() && attempt < config.max_retries => {
                    std::thread::sleep(config.delay(attempt));
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    pub(crate) fn execute_with_listener<T, F>(
        &self,
        listener: Arc<dyn MutatorListener>,
        task: F,
    ) -> Result<T>
    where
        F: FnOnce(&TaskContext) -> Result<T>,
    {
        let inner = &self.inner;
        let tx = inner.coordinator.begin();
        let ctx = match TaskContext::open(
            &inner.store,
            inner.coordinator.clone(),
            tx.clone(),
            inner.codec.clone(),
            inner.ids.clone(),
            listener,
        ) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.abort(&tx);
                return Err(e);
            }
        };

        let outcome = task(&ctx).and_then(|value| {
            ctx.entities().flush()?;
            ctx.validate_bindings()?;
            Ok(value)
        });
        match outcome {
            Ok(value) => {
                inner.coordinator.commit(&tx)?;
                Ok(value)
            }
            Err(e) => {
                self.abort(&tx);
                Err(e)
            }
        }
    }

    fn abort(&self, tx: &ember_concurrency::Transaction) {
        if tx.status().can_rollback() {
            if let Err(e) = self.inner.coordinator.rollback(tx) {
                error!(target: "ember::txn", txn_id = tx.id(), error = %e, "Rollback failed");
            }
        }
    }

    /// Collector over this database
    pub fn collector(&self) -> MarkSweepCollector {
        MarkSweepCollector::new(self.clone())
    }

    /// Start the background collector, if `gc.interval_ms` is configured
    ///
    /// # Errors
    /// Returns `Error::Config` when no interval is configured.
    pub fn spawn_gc_runner(&self) -> Result<GcRunner> {
        let interval = self.inner.config.gc.interval().ok_or_else(|| {
            Error::Config("gc.interval_ms is required for the background collector".to_string())
        })?;
        let runner = GcRunner::new(self.collector(), interval);
        runner.start()?;
        Ok(runner)
    }

    /// Underlying revisioned store
    pub fn store(&self) -> &Arc<RevisionedStore> {
        &self.inner.store
    }

    /// Transaction coordinator
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.inner.coordinator
    }

    /// Configuration the database was opened with
    pub fn config(&self) -> &EmberConfig {
        &self.inner.config
    }

    /// Mutator log shared with the collector
    pub fn mutator_log(&self) -> &Arc<MutatorLog> {
        &self.inner.mutator_log
    }

    /// Largest entity id allocated so far
    pub fn largest_entity_id(&self) -> u64 {
        self.inner.ids.largest_used()
    }

    pub(crate) fn try_lock_collection(&self) -> Option<MutexGuard<'_, ()>> {
        self.inner.collection_lock.try_lock()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("revision", &self.inner.store.current_revision())
            .field("codec", &self.inner.codec)
            .field("config", &self.inner.config)
            .finish()
    }
}
