//! Per-task step pipeline.
//!
//! A task runs `Downloading` (metadata, part list, transcripts) and then
//! `Summarizing` (every enrichment step for every part). Each step's
//! artifact path doubles as its checkpoint: an existing artifact is never
//! regenerated, so a rerun after a crash resumes where the last run stopped.
//! The stop token is checked before and after every remote call.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::caller::ResilientCaller;
use crate::cancellation::CancellationToken;
use crate::clients::{
    ArtifactStore, EnrichmentClient, GenerationContext, ResourceMetadata, SourceClient, SourceUnit,
};
use crate::core::{
    ArtifactRecord, StepKind, StepResult, TaskDescriptor, TaskId, TaskState, TaskStatus,
};
use crate::errors::DigestError;
use crate::observability::SpanTimer;
use crate::registry::{StatusUpdate, TaskRegistry};
use crate::subtitle::Transcript;
use crate::utils::sanitize_filename;

/// Everything a pipeline run needs. Shared by all workers of a service.
#[derive(Clone)]
pub struct PipelineDeps {
    /// Status registry.
    pub registry: Arc<dyn TaskRegistry>,
    /// Video source.
    pub source: Arc<dyn SourceClient>,
    /// Enrichment backend.
    pub enrichment: Arc<dyn EnrichmentClient>,
    /// Artifact persistence.
    pub store: Arc<dyn ArtifactStore>,
    /// Resilience wrapper for source calls.
    pub source_caller: Arc<ResilientCaller>,
    /// Resilience wrapper for enrichment calls.
    pub enrichment_caller: Arc<ResilientCaller>,
}

impl std::fmt::Debug for PipelineDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDeps")
            .field("source_caller", &self.source_caller)
            .field("enrichment_caller", &self.enrichment_caller)
            .finish_non_exhaustive()
    }
}

/// Why a run ended early.
enum Halt {
    Stop,
    Fail(DigestError),
}

impl From<DigestError> for Halt {
    fn from(err: DigestError) -> Self {
        Self::Fail(err)
    }
}

type Flow<T = ()> = std::result::Result<T, Halt>;

/// A part whose transcript is available.
struct PreparedUnit {
    unit: SourceUnit,
    stem: String,
    transcript_path: PathBuf,
    transcript: Transcript,
}

/// Executes one task to a terminal state.
pub struct TaskPipeline {
    deps: Arc<PipelineDeps>,
    task: TaskDescriptor,
    token: Arc<CancellationToken>,
}

impl TaskPipeline {
    /// Prepares a run. The stop token is taken from the registry.
    #[must_use]
    pub fn new(deps: Arc<PipelineDeps>, task: TaskDescriptor) -> Self {
        let token = deps
            .registry
            .stop_token(task.id)
            .unwrap_or_else(|| Arc::new(CancellationToken::new()));
        Self { deps, task, token }
    }

    /// Id of the task this pipeline runs.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    /// Runs the task and writes its terminal state. Never returns an error:
    /// every failure ends up in the task's status record.
    pub async fn run(self) -> Option<TaskStatus> {
        let outcome = self.execute().await;
        self.finish(outcome)
    }

    async fn execute(&self) -> Flow<String> {
        self.checkpoint()?;
        self.update(StatusUpdate::transition(
            TaskState::Downloading,
            "Fetching video metadata",
        ))?;

        let source = &self.deps.source;
        let resource = self.task.resource.as_str();
        let metadata = self
            .deps
            .source_caller
            .call("fetch_metadata", || source.fetch_metadata(resource))
            .await?;
        self.checkpoint()?;

        let output_dir = self.output_dir(&metadata);
        self.update(StatusUpdate::Resource {
            title: metadata.title.clone(),
            output_dir: output_dir.clone(),
        })?;
        self.progress(format!("Listing parts of {}", metadata.title));

        let all_units = self
            .deps
            .source_caller
            .call("fetch_units", || source.fetch_units(&metadata))
            .await?;
        self.checkpoint()?;

        let multi_part = all_units.len() > 1;
        let mut stems = unit_stems(&metadata.title, &all_units, multi_part);
        let units = select_units(
            all_units,
            metadata.requested_part,
            self.task.options.download_all_parts,
        );

        let unit_count = units.len();
        let mut prepared = Vec::with_capacity(unit_count);
        for (i, unit) in units.into_iter().enumerate() {
            self.checkpoint()?;
            self.progress(format!("[{}/{unit_count}] Fetching subtitles: {}", i + 1, unit.title));
            let stem = stems
                .remove(&unit.index)
                .unwrap_or_else(|| unit_stem(&metadata.title, &unit, multi_part));
            if let Some(ready) = self.prepare_unit(unit, stem, &output_dir).await? {
                prepared.push(ready);
            }
        }

        if prepared.is_empty() {
            return Err(Halt::Fail(DigestError::NoContent(format!(
                "no subtitles available for '{}'",
                metadata.title
            ))));
        }

        self.update(StatusUpdate::transition(
            TaskState::Summarizing,
            format!("Summarizing {} part(s)", prepared.len()),
        ))?;

        let total = prepared.len();
        let mut produced = 0usize;
        let mut reused = 0usize;

        for (i, unit) in prepared.iter().enumerate() {
            self.checkpoint()?;
            let context = GenerationContext {
                profile: self.task.profile.clone(),
                resource_title: metadata.title.clone(),
                unit_title: unit.unit.title.clone(),
            };

            for step in StepKind::ALL {
                self.checkpoint()?;
                self.progress(format!(
                    "[{}/{}] {} ({}/{}): {}",
                    i + 1,
                    total,
                    unit.stem,
                    step.position(),
                    StepKind::ALL.len(),
                    step.label()
                ));

                let result = self.run_step(step, unit, &context, &output_dir).await;
                let reused_artifact = result.is_skipped();
                let path = match result {
                    StepResult::Skipped(path) | StepResult::Produced(path) => path,
                    StepResult::Failed(err) => return Err(Halt::Fail(err)),
                };
                if reused_artifact {
                    reused += 1;
                } else {
                    produced += 1;
                }

                self.update(StatusUpdate::Artifact {
                    unit: unit.stem.clone(),
                    transcript: unit.transcript_path.clone(),
                    record: ArtifactRecord {
                        step,
                        path,
                        reused: reused_artifact,
                    },
                })?;
                self.checkpoint()?;
            }
        }

        Ok(format!(
            "Completed {total} part(s): {produced} artifact(s) generated, {reused} reused"
        ))
    }

    /// Obtains a unit's transcript, reusing a persisted copy when present.
    /// Returns `None` when the unit has no usable transcript.
    async fn prepare_unit(
        &self,
        unit: SourceUnit,
        stem: String,
        output_dir: &Path,
    ) -> Flow<Option<PreparedUnit>> {
        let transcript_path = output_dir.join(format!("{stem}.srt"));

        if let Some(transcript) = self.load_transcript(&transcript_path).await? {
            info!(task_id = %self.task.id, path = %transcript_path.display(), "Reusing existing transcript");
            return Ok(Some(PreparedUnit {
                unit,
                stem,
                transcript_path,
                transcript,
            }));
        }

        let source = &self.deps.source;
        let fetched = self
            .deps
            .source_caller
            .call("fetch_asset", || source.fetch_asset(&unit))
            .await;

        let transcript = match fetched {
            Ok(transcript) if !transcript.is_empty() => transcript,
            Ok(_) => {
                warn!(task_id = %self.task.id, unit = %unit.title, "Transcript is empty, skipping part");
                return Ok(None);
            }
            Err(DigestError::NotFound(reason)) => {
                warn!(task_id = %self.task.id, unit = %unit.title, %reason, "No transcript, skipping part");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        self.deps
            .store
            .write(&transcript_path, &transcript.to_srt())
            .await?;
        self.checkpoint()?;

        Ok(Some(PreparedUnit {
            unit,
            stem,
            transcript_path,
            transcript,
        }))
    }

    async fn load_transcript(&self, path: &Path) -> Flow<Option<Transcript>> {
        if !self.deps.store.exists(path).await? {
            return Ok(None);
        }
        let text = self.deps.store.read(path).await?;
        match Transcript::from_srt("srt", &text) {
            Ok(transcript) if !transcript.is_empty() => Ok(Some(transcript)),
            Ok(_) | Err(_) => {
                warn!(path = %path.display(), "Existing transcript is unusable, fetching again");
                Ok(None)
            }
        }
    }

    async fn run_step(
        &self,
        step: StepKind,
        unit: &PreparedUnit,
        context: &GenerationContext,
        output_dir: &Path,
    ) -> StepResult {
        let path = step.artifact_path(output_dir, &unit.stem);

        match self.deps.store.exists(&path).await {
            Ok(true) => {
                info!(task_id = %self.task.id, %step, path = %path.display(), "Artifact exists, skipping step");
                return StepResult::Skipped(path);
            }
            Ok(false) => {}
            Err(err) => return StepResult::Failed(err),
        }

        let text = match step {
            StepKind::KeyPoints => unit.transcript.timestamped_text(),
            _ => unit.transcript.plain_text(),
        };

        let timer = SpanTimer::start(format!("generate_{step}"));
        let enrichment = &self.deps.enrichment;
        let content = match self
            .deps
            .enrichment_caller
            .call(timer.name(), || enrichment.generate(step, &text, context))
            .await
        {
            Ok(content) => content,
            Err(err) => return StepResult::Failed(err),
        };

        let rendered = match content.render() {
            Ok(rendered) => rendered,
            Err(err) => return StepResult::Failed(err),
        };
        if let Err(err) = self.deps.store.write(&path, &rendered).await {
            return StepResult::Failed(err);
        }

        info!(
            task_id = %self.task.id,
            %step,
            path = %path.display(),
            duration_ms = timer.finish(),
            "Artifact produced"
        );
        StepResult::Produced(path)
    }

    fn output_dir(&self, metadata: &ResourceMetadata) -> PathBuf {
        let folder = match self.task.options.folder_name.as_deref() {
            Some(name) if !name.trim().is_empty() => sanitize_filename(name),
            _ => sanitize_filename(&metadata.title),
        };
        self.task.output_dir.join(folder)
    }

    fn checkpoint(&self) -> Flow {
        if self.token.is_cancelled() {
            debug!(task_id = %self.task.id, "Stop observed at checkpoint");
            return Err(Halt::Stop);
        }
        Ok(())
    }

    fn update(&self, update: StatusUpdate) -> Flow<TaskStatus> {
        match self.deps.registry.apply(self.task.id, update) {
            Ok(status) => Ok(status),
            Err(DigestError::InvalidTransition {
                from: TaskState::Stopping,
                ..
            }) => Err(Halt::Stop),
            Err(err) => Err(Halt::Fail(err)),
        }
    }

    fn progress(&self, message: String) {
        if let Err(err) = self.deps.registry.apply(self.task.id, StatusUpdate::Progress { message }) {
            debug!(task_id = %self.task.id, error = %err, "Progress update rejected");
        }
    }

    fn finish(&self, outcome: Flow<String>) -> Option<TaskStatus> {
        let id = self.task.id;
        let update = match outcome {
            Ok(message) => {
                info!(task_id = %id, %message, "Task completed");
                StatusUpdate::Complete { message }
            }
            Err(Halt::Stop) => {
                info!(task_id = %id, reason = ?self.token.reason(), "Task stopped");
                StatusUpdate::Stopped {
                    message: "Stopped by request".to_string(),
                }
            }
            Err(Halt::Fail(err)) if self.token.is_cancelled() => {
                warn!(task_id = %id, error = %err, "Step failed after stop was requested");
                StatusUpdate::Stopped {
                    message: format!("Stopped by request; in-flight step failed: {err}"),
                }
            }
            Err(Halt::Fail(err)) => {
                error!(task_id = %id, error = %err, "Task failed");
                StatusUpdate::Fail {
                    error: err.to_string(),
                }
            }
        };

        match self.deps.registry.apply(id, update) {
            Ok(status) => Some(status),
            // A stop landed between the last checkpoint and the final update.
            Err(DigestError::InvalidTransition {
                from: TaskState::Stopping,
                ..
            }) => self
                .deps
                .registry
                .apply(
                    id,
                    StatusUpdate::Stopped {
                        message: "Stopped by request".to_string(),
                    },
                )
                .ok(),
            Err(err) => {
                error!(task_id = %id, error = %err, "Could not record final task state");
                self.deps.registry.get(id)
            }
        }
    }
}

/// Keeps the requested part (or the first one) unless every part is wanted.
#[must_use]
pub fn select_units(
    units: Vec<SourceUnit>,
    requested_part: Option<u32>,
    all_parts: bool,
) -> Vec<SourceUnit> {
    if all_parts {
        return units;
    }
    let wanted = requested_part
        .and_then(|part| units.iter().position(|u| u.index == part))
        .unwrap_or(0);
    units.into_iter().nth(wanted).into_iter().collect()
}

/// File stem for a unit: the resource title, plus the part title for
/// multi-part resources.
#[must_use]
pub fn unit_stem(title: &str, unit: &SourceUnit, multi_part: bool) -> String {
    if multi_part {
        sanitize_filename(&format!("{title}_{}", unit.title))
    } else {
        sanitize_filename(title)
    }
}

/// Stems for every part of a resource, keyed by part index. A stem that
/// collides with an earlier part's gets a `_P{index}` suffix, so no two parts
/// share artifacts.
#[must_use]
pub fn unit_stems(title: &str, units: &[SourceUnit], multi_part: bool) -> HashMap<u32, String> {
    let mut taken = HashSet::with_capacity(units.len());
    let mut stems = HashMap::with_capacity(units.len());
    for unit in units {
        let mut stem = unit_stem(title, unit, multi_part);
        if taken.contains(&stem) {
            let base = stem.clone();
            let mut n = unit.index;
            stem = format!("{base}_P{n}");
            while taken.contains(&stem) {
                n += 1;
                stem = format!("{base}_P{n}");
            }
        }
        taken.insert(stem.clone());
        stems.insert(unit.index, stem);
    }
    stems
}
