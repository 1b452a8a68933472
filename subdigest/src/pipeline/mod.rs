//! Task execution.
//!
//! This module provides:
//! - Retry policies with backoff, jitter and request pacing
//! - A resilient caller wrapping remote calls with timeouts and retries
//! - The per-task step pipeline with checkpointed artifacts

mod caller;
mod retry;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use caller::{CallStats, ResilientCaller};
pub use retry::{BackoffStrategy, JitterStrategy, RetryPolicy};
pub use runner::{select_units, unit_stem, unit_stems, PipelineDeps, TaskPipeline};
