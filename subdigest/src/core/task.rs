//! Task descriptors and status records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use super::artifact::ResultBag;
use super::status::TaskState;
use crate::utils::{now_utc, Timestamp};

/// Opaque, unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Per-task processing options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Process every part of a multi-part resource instead of only the
    /// requested one.
    #[serde(default)]
    pub download_all_parts: bool,
    /// Folder name to use under the output directory instead of the title.
    #[serde(default)]
    pub folder_name: Option<String>,
}

/// What a caller asks for; becomes a [`TaskDescriptor`] on submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Resource identifier (video URL).
    pub resource: String,
    /// Root output directory.
    pub output_dir: PathBuf,
    /// Name of the processing profile (model) to enrich with.
    pub profile: String,
    /// Extra options.
    #[serde(default)]
    pub options: TaskOptions,
}

impl TaskRequest {
    /// Creates a request with default options.
    #[must_use]
    pub fn new(
        resource: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            output_dir: output_dir.into(),
            profile: profile.into(),
            options: TaskOptions::default(),
        }
    }

    /// Sets whether all parts are processed.
    #[must_use]
    pub fn with_all_parts(mut self, all_parts: bool) -> Self {
        self.options.download_all_parts = all_parts;
        self
    }

    /// Sets a custom folder name.
    #[must_use]
    pub fn with_folder_name(mut self, name: impl Into<String>) -> Self {
        self.options.folder_name = Some(name.into());
        self
    }
}

/// Immutable input handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Task id assigned at submission.
    pub id: TaskId,
    /// Resource identifier (video URL).
    pub resource: String,
    /// Root output directory.
    pub output_dir: PathBuf,
    /// Processing profile name.
    pub profile: String,
    /// Extra options.
    pub options: TaskOptions,
}

impl TaskDescriptor {
    /// Assigns a fresh id to a request.
    #[must_use]
    pub fn from_request(request: TaskRequest) -> Self {
        Self {
            id: TaskId::new(),
            resource: request.resource,
            output_dir: request.output_dir,
            profile: request.profile,
            options: request.options,
        }
    }
}

/// Mutable status record, shared through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task id.
    pub id: TaskId,
    /// Resource identifier the task processes.
    pub resource: String,
    /// Current state.
    pub state: TaskState,
    /// Human readable progress message.
    pub message: String,
    /// Set once a stop was requested. Never cleared.
    pub stop_requested: bool,
    /// Resolved resource title, once known.
    pub title: Option<String>,
    /// Directory artifacts are written to, once known.
    pub output_dir: Option<PathBuf>,
    /// Artifacts produced or reused so far.
    pub results: ResultBag,
    /// Error description for failed tasks.
    pub error: Option<String>,
    /// When the task was submitted.
    pub created_at: Timestamp,
    /// When a worker picked the task up.
    pub started_at: Option<Timestamp>,
    /// When the task reached a terminal state.
    pub completed_at: Option<Timestamp>,
}

impl TaskStatus {
    /// Creates the Pending record for a freshly submitted descriptor.
    #[must_use]
    pub fn pending(descriptor: &TaskDescriptor) -> Self {
        Self {
            id: descriptor.id,
            resource: descriptor.resource.clone(),
            state: TaskState::Pending,
            message: "Waiting in queue".to_string(),
            stop_requested: false,
            title: None,
            output_dir: None,
            results: ResultBag::default(),
            error: None,
            created_at: now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Returns true if the task reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
