//! Database configuration via `ember.toml`
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. Sections mirror the components they tune.

use super::transactions::RetryConfig;
use ember_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "ember.toml";

/// Transaction and commit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    /// Shuffle participant invocation order in every transaction
    pub randomize_participant_order: bool,
    /// Bound on waiting for a key locked by another prepare, in milliseconds
    pub commit_lock_wait_ms: u64,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            randomize_participant_order: true,
            commit_lock_wait_ms: 50,
        }
    }
}

impl TransactionSettings {
    /// Commit-lock wait as a `Duration`
    pub fn commit_lock_wait(&self) -> Duration {
        Duration::from_millis(self.commit_lock_wait_ms)
    }
}

/// Garbage collector settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Nodes handled per collector micro-transaction
    pub batch_size: usize,
    /// Conflict retries per micro-transaction
    pub step_retries: usize,
    /// How long a pass waits for transactions begun before it, in milliseconds
    pub handshake_timeout_ms: u64,
    /// Period of the background runner; no runner when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            step_retries: 5,
            handshake_timeout_ms: 5000,
            interval_ms: None,
        }
    }
}

impl GcConfig {
    /// Handshake timeout as a `Duration`
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Runner period as a `Duration`
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }
}

/// Database configuration loaded from `ember.toml`
///
/// # Example
///
/// ```toml
/// [transaction]
/// randomize_participant_order = true
/// commit_lock_wait_ms = 50
///
/// [gc]
/// batch_size = 64
/// interval_ms = 1000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmberConfig {
    /// Transaction and commit settings
    pub transaction: TransactionSettings,
    /// Retry policy of `Database::execute_with_retry`
    pub retry: RetryConfig,
    /// Garbage collector settings
    pub gc: GcConfig,
}

impl EmberConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Ember database configuration

[transaction]
# Shuffle the order transaction participants are invoked in
randomize_participant_order = true
# Bounded wait on a key locked by another prepare (milliseconds)
commit_lock_wait_ms = 50

[retry]
max_retries = 5
base_delay_ms = 1
max_delay_ms = 50
# Randomize each wait within the upper half of its backoff window
jitter = true

[gc]
# Nodes per collector micro-transaction
batch_size = 64
# Conflict retries per micro-transaction
step_retries = 5
# Wait for transactions begun before a pass (milliseconds)
handshake_timeout_ms = 5000
# Period of the background runner (milliseconds)
# interval_ms = 1000
"#
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the document does not parse or a value is
    /// out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EmberConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.gc.batch_size == 0 {
            return Err(Error::Config("gc.batch_size must be at least 1".to_string()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.gc.interval_ms == Some(0) {
            return Err(Error::Config("gc.interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}
