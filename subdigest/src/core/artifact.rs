//! Artifact records, step outcomes and the per-task result bag.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::status::{ArtifactFormat, StepKind};
use crate::errors::DigestError;

/// Content returned by an enrichment step, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "body", rename_all = "snake_case")]
pub enum ArtifactContent {
    /// Structured result.
    Json(serde_json::Value),
    /// Markdown document.
    Markdown(String),
}

impl ArtifactContent {
    /// The on-disk format of this content.
    #[must_use]
    pub fn format(&self) -> ArtifactFormat {
        match self {
            Self::Json(_) => ArtifactFormat::Json,
            Self::Markdown(_) => ArtifactFormat::Markdown,
        }
    }

    /// Renders the content as the text written to the artifact store.
    pub fn render(&self) -> Result<String, DigestError> {
        match self {
            Self::Json(value) => Ok(serde_json::to_string_pretty(value)?),
            Self::Markdown(text) => Ok(text.clone()),
        }
    }
}

/// Outcome of running one step for one unit.
#[derive(Debug)]
pub enum StepResult {
    /// The artifact already existed; nothing was generated.
    Skipped(PathBuf),
    /// A new artifact was generated and persisted.
    Produced(PathBuf),
    /// The step failed.
    Failed(DigestError),
}

impl StepResult {
    /// Path of the artifact, if the step did not fail.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Skipped(path) | Self::Produced(path) => Some(path),
            Self::Failed(_) => None,
        }
    }

    /// Returns true if the step reused an existing artifact.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Location of one persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Step that owns the artifact.
    pub step: StepKind,
    /// Artifact location.
    pub path: PathBuf,
    /// True if the artifact existed before this run.
    pub reused: bool,
}

/// Artifacts belonging to one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitArtifacts {
    /// Unit title (file stem).
    pub unit: String,
    /// Transcript the steps were derived from.
    pub transcript: PathBuf,
    /// Step artifacts in pipeline order.
    pub artifacts: Vec<ArtifactRecord>,
}

/// Accumulated results of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultBag {
    /// Per-unit artifacts in processing order.
    pub units: Vec<UnitArtifacts>,
}

impl ResultBag {
    /// Records an artifact, creating the unit entry on first use.
    pub fn record(&mut self, unit: &str, transcript: &Path, record: ArtifactRecord) {
        if let Some(entry) = self.units.iter_mut().find(|u| u.unit == unit) {
            entry.artifacts.push(record);
            return;
        }
        self.units.push(UnitArtifacts {
            unit: unit.to_string(),
            transcript: transcript.to_path_buf(),
            artifacts: vec![record],
        });
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Every artifact path, in recording order.
    #[must_use]
    pub fn paths(&self) -> Vec<&Path> {
        self.units
            .iter()
            .flat_map(|u| u.artifacts.iter().map(|a| a.path.as_path()))
            .collect()
    }

    /// Number of artifacts that were generated rather than reused.
    #[must_use]
    pub fn produced_count(&self) -> usize {
        self.units
            .iter()
            .flat_map(|u| u.artifacts.iter())
            .filter(|a| !a.reused)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_bag_groups_by_unit() {
        let mut bag = ResultBag::default();
        let transcript = Path::new("out/a.srt");
        bag.record(
            "a",
            transcript,
            ArtifactRecord {
                step: StepKind::KeyPoints,
                path: "out/a_summary.json".into(),
                reused: true,
            },
        );
        bag.record(
            "a",
            transcript,
            ArtifactRecord {
                step: StepKind::FullDocument,
                path: "out/markdown/a.md".into(),
                reused: false,
            },
        );
        bag.record(
            "b",
            Path::new("out/b.srt"),
            ArtifactRecord {
                step: StepKind::KeyPoints,
                path: "out/b_summary.json".into(),
                reused: false,
            },
        );

        assert_eq!(bag.units.len(), 2);
        assert_eq!(bag.units[0].artifacts.len(), 2);
        assert_eq!(bag.paths().len(), 3);
        assert_eq!(bag.produced_count(), 2);
    }

    #[test]
    fn test_artifact_content_render() {
        let json = ArtifactContent::Json(serde_json::json!({"key_points": []}));
        assert_eq!(json.format(), ArtifactFormat::Json);
        assert!(json.render().unwrap().contains("key_points"));

        let md = ArtifactContent::Markdown("# Title".into());
        assert_eq!(md.render().unwrap(), "# Title");
    }

    #[test]
    fn test_step_result_path() {
        let skipped = StepResult::Skipped("x.json".into());
        assert!(skipped.is_skipped());
        assert_eq!(skipped.path(), Some(Path::new("x.json")));

        let failed = StepResult::Failed(DigestError::Generation("boom".into()));
        assert!(failed.path().is_none());
    }
}
