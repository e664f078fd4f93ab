//! Scheduler configuration.
//!
//! Loaded from TOML, optionally overridden from the environment, and
//! validated before a [`Scheduler`](crate::Scheduler) is constructed.
//!
//! ```toml
//! max_batch_size = 16
//! batch_window_ms = 50
//! queue_capacity = 1024
//! backpressure = "suspend"
//! default_request_timeout_ms = 2000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// Largest bound a tokio mpsc channel accepts.
pub const MAX_QUEUE_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

// ============================================================================
// BACKPRESSURE POLICY
// ============================================================================

/// What admission does when the ingestion queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressurePolicy {
    /// Suspend the submitting task until capacity frees.
    #[default]
    Suspend,
    /// Fail immediately with `SchedulerError::QueueFull`.
    Reject,
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "suspend" => Ok(Self::Suspend),
            "reject" => Ok(Self::Reject),
            other => Err(SchedulerError::config(format!(
                "unknown backpressure policy '{other}' (expected 'suspend' or 'reject')"
            ))),
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the micro-batching scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of requests per dispatched batch (default: 16).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Time a batch stays open after its first request arrives (default: 50ms).
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Bounded capacity of the ingestion queue (default: 1024, at most
    /// [`MAX_QUEUE_CAPACITY`]).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Behaviour of `submit()` on a full queue.
    #[serde(default)]
    pub backpressure: BackpressurePolicy,

    /// Deadline applied by `Scheduler::infer()`. `None` waits indefinitely.
    #[serde(default)]
    pub default_request_timeout_ms: Option<u64>,
}

fn default_max_batch_size() -> usize {
    16
}

fn default_batch_window_ms() -> u64 {
    50
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            batch_window_ms: default_batch_window_ms(),
            queue_capacity: default_queue_capacity(),
            backpressure: BackpressurePolicy::default(),
            default_request_timeout_ms: None,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// * `SchedulerError::ConfigError` if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let path = path.as_ref();

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        toml::from_str(&contents).map_err(|e| {
            SchedulerError::config(format!(
                "Failed to parse TOML in '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Apply `SCHEDULER_*` environment variable overrides.
    ///
    /// Unparseable values are ignored and logged.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(size) = env_parse::<usize>("SCHEDULER_MAX_BATCH_SIZE") {
            self.max_batch_size = size;
        }
        if let Some(ms) = env_parse::<u64>("SCHEDULER_BATCH_WINDOW_MS") {
            self.batch_window_ms = ms;
        }
        if let Some(capacity) = env_parse::<usize>("SCHEDULER_QUEUE_CAPACITY") {
            self.queue_capacity = capacity;
        }
        if let Some(policy) = env_parse::<BackpressurePolicy>("SCHEDULER_BACKPRESSURE") {
            self.backpressure = policy;
        }
        if let Some(ms) = env_parse::<u64>("SCHEDULER_REQUEST_TIMEOUT_MS") {
            self.default_request_timeout_ms = (ms > 0).then_some(ms);
        }
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// * `SchedulerError::ConfigError` naming the first invalid field
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_batch_size == 0 {
            return Err(SchedulerError::config("max_batch_size must be > 0"));
        }
        if self.batch_window_ms == 0 {
            return Err(SchedulerError::config("batch_window_ms must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(SchedulerError::config("queue_capacity must be > 0"));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(SchedulerError::config(format!(
                "queue_capacity must be <= {MAX_QUEUE_CAPACITY}, got {}",
                self.queue_capacity
            )));
        }
        if self.default_request_timeout_ms == Some(0) {
            return Err(SchedulerError::config(
                "default_request_timeout_ms must be > 0 when set",
            ));
        }
        Ok(())
    }

    /// Batch window as a `Duration`.
    #[inline]
    #[must_use]
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Default per-request deadline as a `Duration`.
    #[inline]
    #[must_use]
    pub fn default_request_timeout(&self) -> Option<Duration> {
        self.default_request_timeout_ms.map(Duration::from_millis)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable scheduler override");
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
