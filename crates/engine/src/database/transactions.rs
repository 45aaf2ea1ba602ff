//! Retry policy for conflicting transactions
//!
//! Used by `Database::execute_with_retry` and by every collector step.
//! Attempt `n` waits `base_delay_ms * 2^n`, capped at `max_delay_ms`. With
//! `jitter` on, the wait is drawn from the upper half of that window so
//! tasks that conflicted together do not retry in lockstep.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often, and how patiently, a conflicting task is rerun
///
/// Only optimistic conflicts are retried; every other error is returned
/// on the first attempt.
///
/// ```ignore
/// let retry = RetryConfig::new().with_max_retries(10).with_backoff(2, 40);
/// db.execute_with_retry(&retry, |ctx| { ... })?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Reruns after the first attempt
    pub max_retries: usize,
    /// Wait before the first rerun, in milliseconds
    pub base_delay_ms: u64,
    /// Cap on any single wait, in milliseconds
    pub max_delay_ms: u64,
    /// Randomize each wait within the upper half of its window
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 5,
            base_delay_ms: 1,
            max_delay_ms: 50,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Default policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that never reruns
    pub fn no_retry() -> Self {
        RetryConfig {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first wait and the cap, both in milliseconds
    pub fn with_backoff(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Wait exactly the backoff window every time
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Upper bound of the wait before rerun number `attempt` (from 0)
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|shift| 1u64.checked_shl(shift))
            .unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Wait before rerun number `attempt`, jittered if configured
    pub(crate) fn delay(&self, attempt: usize) -> Duration {
        let ceiling = self.backoff(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let floor = ceiling / 2;
        rand::thread_rng().gen_range(floor..=ceiling)
    }
}
