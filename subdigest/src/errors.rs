//! Error types for the subdigest engine.
//!
//! Errors fall into four groups: transient remote failures that the
//! resilient caller retries, terminal remote failures that fail a task
//! immediately, local I/O failures, and registry/service misuse reported
//! back to the caller.

use thiserror::Error;

use crate::core::{TaskId, TaskState};

/// The main error type for subdigest operations.
#[derive(Debug, Error)]
pub enum DigestError {
    /// A remote call failed in a way that may succeed if repeated.
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// A single attempt exceeded its time budget.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// The logical operation that timed out.
        operation: String,
        /// The per-attempt timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The remote side reported the resource as absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote side rejected the request (4xx other than 404/429).
    #[error("Remote rejected request ({status}): {message}")]
    Remote {
        /// HTTP or platform status code.
        status: i64,
        /// Message reported by the remote side.
        message: String,
    },

    /// All retry attempts were consumed by transient failures.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// The logical operation.
        operation: String,
        /// How many attempts were made.
        attempts: usize,
        /// Rendering of the final error.
        last_error: String,
    },

    /// Nothing enrichable was produced for a resource.
    #[error("no content: {0}")]
    NoContent(String),

    /// The enrichment backend failed permanently.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// No model profile with the requested name exists.
    #[error("Unknown processing profile '{name}'. Available: {available}")]
    UnknownProfile {
        /// Requested profile name.
        name: String,
        /// Comma separated list of configured profiles.
        available: String,
    },

    /// The task id is not (or no longer) known to the registry.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// A status change would violate the task state machine.
    #[error("Task {task_id} is {from}, cannot move to {to}")]
    InvalidTransition {
        /// The task.
        task_id: TaskId,
        /// Current state.
        from: TaskState,
        /// Rejected target state.
        to: TaskState,
    },

    /// Work was submitted after the service shut down.
    #[error("Service is shut down")]
    ShutDown,

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DigestError {
    /// Returns true if the resilient caller should retry this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout { .. })
    }

    /// Maps an HTTP status code to an error.
    ///
    /// 404 is terminal, 408/429 and 5xx are transient, every other code is a
    /// permanent rejection.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 | 410 => Self::NotFound(message),
            408 | 429 | 500..=599 => Self::Transient(format!("HTTP {status}: {message}")),
            _ => Self::Remote {
                status: i64::from(status),
                message,
            },
        }
    }
}

impl From<serde_json::Error> for DigestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for DigestError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        // Transport failures and undecodable bodies are worth another attempt.
        Self::Transient(err.to_string())
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = DigestError> = std::result::Result<T, E>;
