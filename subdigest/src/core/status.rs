//! Task state and step kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifecycle state of a task.
///
/// States only move forward:
/// `Pending -> Downloading -> Summarizing -> {Completed | Failed}`, and any
/// non-terminal state may move to `Stopping`, which can only end in `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, not yet picked up by a worker.
    #[default]
    Pending,
    /// Fetching metadata and transcripts.
    Downloading,
    /// Running enrichment steps.
    Summarizing,
    /// Every unit and step finished or was skipped.
    Completed,
    /// An unrecoverable error ended the task.
    Failed,
    /// A stop was requested; waiting for the next checkpoint.
    Stopping,
    /// The stop was acknowledged.
    Stopped,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Downloading => write!(f, "downloading"),
            Self::Summarizing => write!(f, "summarizing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl TaskState {
    /// Returns true if no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Returns true while a worker is (or may be) executing the task.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Downloading | Self::Summarizing | Self::Stopping)
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    ///
    /// Re-entering the same non-terminal state is allowed so progress updates
    /// can carry a state without special casing.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        if *self == next {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Downloading | Self::Stopping | Self::Failed)
                | (Self::Downloading, Self::Summarizing | Self::Stopping | Self::Failed)
                | (Self::Summarizing, Self::Completed | Self::Stopping | Self::Failed)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

/// Serialization format of a step artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// Pretty-printed JSON document.
    Json,
    /// Markdown text.
    Markdown,
}

/// The enrichment steps run for every unit, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Timestamped key-point summary.
    KeyPoints,
    /// Full teaching document in markdown.
    FullDocument,
    /// Exercise set with answers.
    Exercises,
    /// Preset questions a learner might ask.
    Questions,
}

impl StepKind {
    /// Every step, in execution order.
    pub const ALL: [Self; 4] = [
        Self::KeyPoints,
        Self::FullDocument,
        Self::Exercises,
        Self::Questions,
    ];

    /// 1-based position in the pipeline.
    #[must_use]
    pub fn position(&self) -> usize {
        match self {
            Self::KeyPoints => 1,
            Self::FullDocument => 2,
            Self::Exercises => 3,
            Self::Questions => 4,
        }
    }

    /// Human readable label used in progress messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::KeyPoints => "key points",
            Self::FullDocument => "full document",
            Self::Exercises => "exercises",
            Self::Questions => "questions",
        }
    }

    /// Format the artifact is persisted in.
    #[must_use]
    pub fn format(&self) -> ArtifactFormat {
        match self {
            Self::FullDocument => ArtifactFormat::Markdown,
            _ => ArtifactFormat::Json,
        }
    }

    /// Where this step's artifact lives for a unit with the given stem.
    #[must_use]
    pub fn artifact_path(&self, dir: &Path, stem: &str) -> PathBuf {
        match self {
            Self::KeyPoints => dir.join(format!("{stem}_summary.json")),
            Self::FullDocument => dir.join("markdown").join(format!("{stem}.md")),
            Self::Exercises => dir.join(format!("{stem}_exercises.json")),
            Self::Questions => dir.join(format!("{stem}_questions.json")),
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyPoints => write!(f, "key_points"),
            Self::FullDocument => write!(f, "full_document"),
            Self::Exercises => write!(f, "exercises"),
            Self::Questions => write!(f, "questions"),
        }
    }
}
