//! Background collection task
//!
//! `GcRunner` runs collector passes on its own thread at a fixed interval.
//!
//! # Design Notes
//!
//! - Each pass goes through `MarkSweepCollector::run`, so it is made of
//!   ordinary short transactions and never blocks application writes
//! - A failed pass is logged and the next one runs on schedule
//! - Graceful shutdown via atomic flag, checked at least every 10ms

use super::collector::MarkSweepCollector;
use ember_core::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// Background collector thread
///
/// # Example
///
/// ```ignore
/// let runner = GcRunner::new(db.collector(), Duration::from_secs(1));
/// runner.start()?;
///
/// // ... use the database ...
///
/// runner.shutdown();
/// ```
pub struct GcRunner {
    collector: MarkSweepCollector,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    passes: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GcRunner {
    /// Create a stopped runner
    ///
    /// # Arguments
    ///
    /// * `collector` - Collector to run
    /// * `interval` - Pause between the end of one pass and the next
    pub fn new(collector: MarkSweepCollector, interval: Duration) -> Self {
        Self {
            collector,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            passes: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
        }
    }

    /// Start the background thread
    ///
    /// The first pass runs after one interval.
    ///
    /// # Errors
    /// Returns `Error::IllegalState` if the runner was already started or
    /// the thread could not be spawned.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.is_shutdown() {
            return Err(Error::IllegalState("GC runner already started".to_string()));
        }

        let collector = self.collector.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let passes = Arc::clone(&self.passes);
        let interval = self.interval;

        let thread = thread::Builder::new()
            .name("ember-gc".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    let sleep_interval = SHUTDOWN_POLL.min(interval);
                    let mut elapsed = Duration::ZERO;
                    while elapsed < interval {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(sleep_interval);
                        elapsed += sleep_interval;
                    }

                    match collector.run() {
                        Ok(_) => {
                            passes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(target: "ember::gc", error = %e, "Background collection pass failed");
                        }
                    }
                }
            })
            .map_err(|e| Error::IllegalState(format!("Failed to spawn GC thread: {}", e)))?;
        *handle = Some(thread);
        debug!(target: "ember::gc", interval_ms = interval.as_millis() as u64, "GC runner started");
        Ok(())
    }

    /// Signal shutdown and wait for the thread to exit
    ///
    /// A pass in progress is finished first.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.handle.lock().take() {
            if thread.join().is_err() {
                error!(target: "ember::gc", "GC thread panicked");
            }
        }
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Number of passes completed successfully
    pub fn passes_completed(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

impl Drop for GcRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for GcRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcRunner")
            .field("interval", &self.interval)
            .field("shutdown", &self.is_shutdown())
            .field("passes", &self.passes_completed())
            .finish()
    }
}
