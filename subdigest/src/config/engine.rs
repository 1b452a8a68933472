//! Engine settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pipeline::RetryPolicy;
use crate::registry::RetentionPolicy;

/// Settings of one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of workers (maximum tasks in flight).
    pub workers: usize,
    /// Pause a worker takes after each task.
    pub cooldown_ms: u64,
    /// Registry retention.
    pub retention: RetentionPolicy,
    /// Policy for video platform calls.
    pub source_retry: RetryPolicy,
    /// Policy for enrichment calls.
    pub enrichment_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            cooldown_ms: 2000,
            retention: RetentionPolicy::default(),
            source_retry: RetryPolicy::source(),
            enrichment_retry: RetryPolicy::enrichment(),
        }
    }
}

impl EngineConfig {
    /// Sets the worker count. Zero is raised to one.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the worker cool-down.
    #[must_use]
    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the source retry policy.
    #[must_use]
    pub fn with_source_retry(mut self, policy: RetryPolicy) -> Self {
        self.source_retry = policy;
        self
    }

    /// Sets the enrichment retry policy.
    #[must_use]
    pub fn with_enrichment_retry(mut self, policy: RetryPolicy) -> Self {
        self.enrichment_retry = policy;
        self
    }

    /// Cool-down as a Duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}
