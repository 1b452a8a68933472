//! Core domain model types for subdigest.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Task state and step kind enums
//! - Task requests, descriptors and status records
//! - Artifact records and step outcomes

mod artifact;
mod status;
mod task;

pub use artifact::{ArtifactContent, ArtifactRecord, ResultBag, StepResult, UnitArtifacts};
pub use status::{ArtifactFormat, StepKind, TaskState};
pub use task::{TaskDescriptor, TaskId, TaskOptions, TaskRequest, TaskStatus};
