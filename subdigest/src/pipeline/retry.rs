//! Retry policy with configurable backoff, jitter and request pacing.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter applied to backoff delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    #[default]
    Equal,
}

/// Retry, timeout and pacing configuration for one resilient caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    pub max_attempts: usize,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy for backoff delays.
    pub jitter_strategy: JitterStrategy,
    /// Minimum spacing between two requests issued by the same caller.
    pub min_interval_ms: u64,
    /// Upper bound of the random delay added on top of `min_interval_ms`.
    pub pacing_jitter_ms: u64,
    /// Time budget of a single attempt in milliseconds.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::source()
    }
}

impl RetryPolicy {
    /// Policy tuned for the video platform: short timeouts, spaced requests.
    #[must_use]
    pub fn source() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Equal,
            min_interval_ms: 1000,
            pacing_jitter_ms: 500,
            attempt_timeout_ms: 30_000,
        }
    }

    /// Policy tuned for LLM generation: long timeouts, no pacing.
    #[must_use]
    pub fn enrichment() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Equal,
            min_interval_ms: 0,
            pacing_jitter_ms: 0,
            attempt_timeout_ms: 300_000,
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Sets request pacing.
    #[must_use]
    pub fn with_pacing(mut self, min_interval_ms: u64, jitter_ms: u64) -> Self {
        self.min_interval_ms = min_interval_ms;
        self.pacing_jitter_ms = jitter_ms;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout_ms(mut self, timeout: u64) -> Self {
        self.attempt_timeout_ms = timeout;
        self
    }

    /// Number of attempts actually made; at least one.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Per-attempt timeout as a Duration.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Calculates the delay before retry number `retry` (0-indexed).
    #[must_use]
    pub fn backoff_delay(&self, retry: usize) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let step = u32::try_from(retry).unwrap_or(u32::MAX);

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(step)).min(max),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(step) + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    (delay - half) + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    /// Spacing enforced before the next request: the minimum interval plus
    /// a random share of the pacing jitter.
    #[must_use]
    pub fn pacing_delay(&self) -> Duration {
        let jitter = if self.pacing_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.pacing_jitter_ms)
        };
        Duration::from_millis(self.min_interval_ms.saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::source()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.attempt_timeout_ms, 30_000);
        assert_eq!(policy.backoff_strategy, BackoffStrategy::Exponential);

        let enrichment = RetryPolicy::enrichment();
        assert_eq!(enrichment.min_interval_ms, 0);
        assert_eq!(enrichment.attempt_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_attempts_at_least_one() {
        assert_eq!(RetryPolicy::source().with_max_attempts(0).attempts(), 1);
    }

    #[test]
    fn test_exponential_no_jitter() {
        let policy = no_jitter();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_constant() {
        let linear = no_jitter().with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.backoff_delay(2), Duration::from_millis(300));

        let constant = no_jitter().with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.backoff_delay(5), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let policy = no_jitter().with_base_delay_ms(1000).with_max_delay_ms(5000);
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(5000));
        assert_eq!(policy.backoff_delay(usize::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let policy = RetryPolicy::source()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant)
            .with_jitter(JitterStrategy::Equal);

        for _ in 0..50 {
            let ms = policy.backoff_delay(0).as_millis();
            assert!((50..=100).contains(&ms), "delay {ms} out of bounds");
        }
    }

    #[test]
    fn test_full_jitter_bounds() {
        let policy = no_jitter().with_jitter(JitterStrategy::Full);
        for _ in 0..50 {
            assert!(policy.backoff_delay(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_pacing_delay_bounds() {
        let policy = RetryPolicy::source().with_pacing(200, 50);
        for _ in 0..50 {
            let ms = policy.pacing_delay().as_millis();
            assert!((200..=250).contains(&ms));
        }
        assert_eq!(
            RetryPolicy::source().with_pacing(0, 0).pacing_delay(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 5, "jitter_strategy": "none"}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.jitter_strategy, JitterStrategy::None);
        assert_eq!(policy.base_delay_ms, 1000);
    }
}
