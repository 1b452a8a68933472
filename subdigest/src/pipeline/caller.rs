//! Resilient wrapper around a single logical remote call.
//!
//! Every attempt is paced against the previous request issued through the
//! same caller, bounded by a timeout, and retried with backoff while the
//! failure is transient.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use crate::errors::{DigestError, Result};

/// Counters describing what a caller has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    /// Attempts issued, including retries.
    pub attempts: u64,
    /// Retries scheduled after transient failures.
    pub retries: u64,
    /// Calls that gave up after exhausting their attempts.
    pub exhausted: u64,
}

/// Retry/backoff/pacing wrapper shared by every user of one remote API.
#[derive(Debug)]
pub struct ResilientCaller {
    name: String,
    policy: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
    attempts: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
}

impl ResilientCaller {
    /// Creates a caller with the given name (used in logs) and policy.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            last_request: Mutex::new(None),
            attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }
    }

    /// Returns the caller's policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns a snapshot of the caller's counters.
    #[must_use]
    pub fn stats(&self) -> CallStats {
        CallStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Waits until the pacing interval since the previous request elapsed.
    ///
    /// The lock is held while sleeping so concurrent users queue up behind
    /// each other instead of bursting.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.policy.pacing_delay();
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Runs `attempt` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    ///
    /// `attempt` is invoked once per try and must build a fresh future each
    /// time.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.attempts();
        let timeout = self.policy.attempt_timeout();
        let mut tries = 0usize;

        loop {
            tries += 1;
            self.pace().await;
            self.attempts.fetch_add(1, Ordering::Relaxed);

            let outcome = match tokio::time::timeout(timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(DigestError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.policy.attempt_timeout_ms,
                }),
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_transient() {
                debug!(
                    caller = %self.name,
                    operation,
                    attempt = tries,
                    error = %error,
                    "Permanent failure, not retrying"
                );
                return Err(error);
            }

            if tries >= max_attempts {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    caller = %self.name,
                    operation,
                    attempts = tries,
                    error = %error,
                    "Giving up after transient failures"
                );
                return Err(DigestError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: tries,
                    last_error: error.to_string(),
                });
            }

            let delay = self.policy.backoff_delay(tries - 1);
            self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                caller = %self.name,
                operation,
                attempt = tries,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
