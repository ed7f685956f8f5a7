//! Engine configuration.

use crate::core::STATUS_QUEUE;
use std::time::Duration;

/// Tunables for the orchestration engine.
///
/// The defaults suit a single-process deployment with in-memory
/// backends; production deployments mostly tune the consumer pool and
/// the timeout ceiling.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Queue the status consumers drain.
    pub status_queue: String,
    /// Number of concurrent status-consumer tasks.
    pub consumer_pool_size: usize,
    /// How long a blocking pop waits before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// Step timeout applied when the manifest does not set one.
    pub default_step_timeout_secs: u64,
    /// Global ceiling clamping every per-manifest timeout.
    pub max_step_timeout_secs: u64,
    /// How often the sweeper scans for overdue steps.
    pub sweeper_interval: Duration,
    /// Cache TTL applied when a deterministic operation sets none.
    pub default_cache_ttl_secs: u64,
    /// Attempts for store/bus operations inside a status apply.
    pub apply_retry_attempts: u32,
    /// Base delay for the exponential backoff between attempts.
    pub apply_backoff_base: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            status_queue: STATUS_QUEUE.to_string(),
            consumer_pool_size: 4,
            poll_timeout: Duration::from_secs(1),
            default_step_timeout_secs: 300,
            max_step_timeout_secs: 3600,
            sweeper_interval: Duration::from_secs(5),
            default_cache_ttl_secs: 3600,
            apply_retry_attempts: 3,
            apply_backoff_base: Duration::from_millis(50),
        }
    }
}

impl EngineConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the consumer pool size.
    #[must_use]
    pub fn with_consumer_pool_size(mut self, size: usize) -> Self {
        self.consumer_pool_size = size.max(1);
        self
    }

    /// Sets the blocking-pop timeout.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the sweeper scan interval.
    #[must_use]
    pub fn with_sweeper_interval(mut self, interval: Duration) -> Self {
        self.sweeper_interval = interval;
        self
    }

    /// Sets the global step-timeout ceiling.
    #[must_use]
    pub fn with_max_step_timeout_secs(mut self, secs: u64) -> Self {
        self.max_step_timeout_secs = secs;
        self
    }

    /// The effective timeout for an operation: its manifest value (or the
    /// default), clamped by the global ceiling.
    #[must_use]
    pub fn effective_timeout_secs(&self, manifest_timeout: Option<u64>) -> u64 {
        manifest_timeout
            .unwrap_or(self.default_step_timeout_secs)
            .min(self.max_step_timeout_secs)
    }
}
