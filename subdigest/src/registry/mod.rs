//! Task registry: the single source of truth for task status.
//!
//! Workers write through [`TaskRegistry::apply`]; pollers read through
//! [`TaskRegistry::get`] and [`TaskRegistry::list`]. Every operation on a
//! record is atomic with respect to every other registry operation.

mod memory;

pub use memory::{InMemoryTaskRegistry, RetentionPolicy};

use std::path::PathBuf;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::core::{ArtifactRecord, TaskDescriptor, TaskId, TaskState, TaskStatus};
use crate::errors::Result;

/// A change a worker applies to its task's record.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// Move to another state (or re-enter the current one) with a message.
    Transition {
        /// Target state.
        state: TaskState,
        /// New progress message.
        message: String,
    },
    /// Replace the progress message. Ignored once stopping or terminal.
    Progress {
        /// New progress message.
        message: String,
    },
    /// Record the resolved resource title and output directory.
    Resource {
        /// Resource title.
        title: String,
        /// Directory artifacts are written to.
        output_dir: PathBuf,
    },
    /// Add an artifact to the result bag.
    Artifact {
        /// Unit stem the artifact belongs to.
        unit: String,
        /// Transcript of that unit.
        transcript: PathBuf,
        /// The artifact.
        record: ArtifactRecord,
    },
    /// Finish successfully.
    Complete {
        /// Final message.
        message: String,
    },
    /// Finish with an error.
    Fail {
        /// Error description surfaced to users.
        error: String,
    },
    /// Acknowledge a stop request.
    Stopped {
        /// Final message.
        message: String,
    },
}

impl StatusUpdate {
    /// Convenience constructor for a progress update.
    #[must_use]
    pub fn progress(message: impl Into<String>) -> Self {
        Self::Progress {
            message: message.into(),
        }
    }

    /// Convenience constructor for a state transition.
    #[must_use]
    pub fn transition(state: TaskState, message: impl Into<String>) -> Self {
        Self::Transition {
            state,
            message: message.into(),
        }
    }
}

/// Concurrency-safe mapping from task id to status record.
pub trait TaskRegistry: Send + Sync {
    /// Registers a Pending record for a freshly submitted descriptor.
    fn register(&self, descriptor: &TaskDescriptor) -> TaskStatus;

    /// Returns a snapshot of one record.
    fn get(&self, id: TaskId) -> Option<TaskStatus>;

    /// Returns a consistent snapshot of every record, oldest first.
    fn list(&self) -> Vec<TaskStatus>;

    /// Sets the stop flag and moves the record to Stopping.
    ///
    /// Fails with an invalid-transition error if the task is terminal.
    /// Repeated requests on a stopping task are no-ops.
    fn request_stop(&self, id: TaskId) -> Result<TaskStatus>;

    /// The cancellation token the worker observes for this task.
    fn stop_token(&self, id: TaskId) -> Option<Arc<CancellationToken>>;

    /// Applies a worker update, enforcing the state machine.
    fn apply(&self, id: TaskId, update: StatusUpdate) -> Result<TaskStatus>;

    /// Evicts records according to the retention policy. Returns how many
    /// records were removed.
    fn evict_expired(&self) -> usize;
}
