//! Scripted collaborators for exercising the engine without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::clients::{
    EnrichmentClient, GenerationContext, ResourceMetadata, SourceClient, SourceUnit,
};
use crate::core::{ArtifactContent, StepKind};
use crate::errors::{DigestError, Result};
use crate::subtitle::{SubtitleLine, Transcript};

/// Builds a transcript with one cue per two seconds.
#[must_use]
pub fn transcript_of(lines: &[&str]) -> Transcript {
    let lines = lines
        .iter()
        .zip(0u32..)
        .map(|(content, i)| SubtitleLine {
            from: f64::from(i * 2),
            to: f64::from(i * 2 + 2),
            content: (*content).to_string(),
        })
        .collect();
    Transcript::new("zh-CN", lines)
}

#[derive(Debug, Clone)]
struct ScriptedResource {
    title: String,
    units: Vec<(SourceUnit, Option<Transcript>)>,
}

/// Source client serving resources registered up front.
///
/// Unknown resources yield `NotFound`; parts registered without a
/// transcript yield `NotFound` from `fetch_asset`.
#[derive(Debug, Default)]
pub struct ScriptedSourceClient {
    resources: Mutex<HashMap<String, ScriptedResource>>,
    metadata_delay: Mutex<Duration>,
    transient_failures: AtomicUsize,
    metadata_calls: AtomicUsize,
    asset_calls: AtomicUsize,
}

impl ScriptedSourceClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource whose parts all carry a short transcript.
    #[must_use]
    pub fn with_resource(self, resource: &str, title: &str, parts: &[&str]) -> Self {
        let units = parts
            .iter()
            .map(|part| {
                let first = format!("{part} 第一句");
                let second = format!("{part} 第二句");
                Some(transcript_of(&[first.as_str(), second.as_str()]))
            })
            .collect();
        self.with_transcripts(resource, title, parts, units)
    }

    /// Registers a resource with explicit per-part transcripts.
    #[must_use]
    pub fn with_transcripts(
        self,
        resource: &str,
        title: &str,
        parts: &[&str],
        transcripts: Vec<Option<Transcript>>,
    ) -> Self {
        let units = parts
            .iter()
            .zip(transcripts)
            .zip(1u32..)
            .map(|((part, transcript), index)| {
                let unit = SourceUnit {
                    resource_id: resource.to_string(),
                    key: format!("{resource}-{index}"),
                    index,
                    title: (*part).to_string(),
                };
                (unit, transcript)
            })
            .collect();
        self.resources.lock().insert(
            resource.to_string(),
            ScriptedResource {
                title: title.to_string(),
                units,
            },
        );
        self
    }

    /// Delays every metadata lookup.
    #[must_use]
    pub fn with_metadata_delay(self, delay: Duration) -> Self {
        *self.metadata_delay.lock() = delay;
        self
    }

    /// Makes the next `count` metadata lookups fail transiently.
    #[must_use]
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Number of metadata lookups served, failed ones included.
    #[must_use]
    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    /// Number of transcript downloads served.
    #[must_use]
    pub fn asset_calls(&self) -> usize {
        self.asset_calls.load(Ordering::SeqCst)
    }

    fn resource(&self, id: &str) -> Result<ScriptedResource> {
        self.resources
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| DigestError::NotFound(format!("unknown resource '{id}'")))
    }
}

#[async_trait]
impl SourceClient for ScriptedSourceClient {
    async fn fetch_metadata(&self, resource: &str) -> Result<ResourceMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.metadata_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DigestError::Transient("connection reset".to_string()));
        }

        let scripted = self.resource(resource)?;
        Ok(ResourceMetadata {
            id: resource.to_string(),
            title: scripted.title,
            requested_part: None,
            cover_url: None,
        })
    }

    async fn fetch_units(&self, metadata: &ResourceMetadata) -> Result<Vec<SourceUnit>> {
        let scripted = self.resource(&metadata.id)?;
        Ok(scripted.units.into_iter().map(|(unit, _)| unit).collect())
    }

    async fn fetch_asset(&self, unit: &SourceUnit) -> Result<Transcript> {
        self.asset_calls.fetch_add(1, Ordering::SeqCst);
        self.resource(&unit.resource_id)?
            .units
            .into_iter()
            .find(|(candidate, _)| candidate.key == unit.key)
            .and_then(|(_, transcript)| transcript)
            .ok_or_else(|| DigestError::NotFound(format!("no subtitles for {}", unit.title)))
    }
}

/// One recorded `generate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateCall {
    /// Requested step.
    pub step: StepKind,
    /// Resource title from the context.
    pub resource_title: String,
    /// Unit title from the context.
    pub unit_title: String,
}

/// Enrichment client that records calls and returns canned artifacts.
#[derive(Debug, Default)]
pub struct RecordingEnrichmentClient {
    calls: Mutex<Vec<GenerateCall>>,
    delay: Duration,
    failing_step: Option<StepKind>,
    panic_title: Option<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingEnrichmentClient {
    /// Creates a client answering immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps this long inside every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails `step` permanently for every unit.
    #[must_use]
    pub fn failing_on(mut self, step: StepKind) -> Self {
        self.failing_step = Some(step);
        self
    }

    /// Panics when asked to enrich the resource with this title.
    #[must_use]
    pub fn panicking_on(mut self, title: impl Into<String>) -> Self {
        self.panic_title = Some(title.into());
        self
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<GenerateCall> {
        self.calls.lock().clone()
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of calls that were running at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentClient for RecordingEnrichmentClient {
    #[allow(clippy::panic)]
    async fn generate(
        &self,
        step: StepKind,
        _text: &str,
        context: &GenerationContext,
    ) -> Result<ArtifactContent> {
        self.calls.lock().push(GenerateCall {
            step,
            resource_title: context.resource_title.clone(),
            unit_title: context.unit_title.clone(),
        });
        if self.panic_title.as_deref() == Some(context.resource_title.as_str()) {
            panic!("enrichment backend blew up on '{}'", context.resource_title);
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_step == Some(step) {
            return Err(DigestError::Generation(format!("{step} rejected by backend")));
        }

        Ok(match step {
            StepKind::FullDocument => ArtifactContent::Markdown(format!(
                "# {}\n\n{}\n",
                context.resource_title, context.unit_title
            )),
            _ => ArtifactContent::Json(json!({
                "step": step.to_string(),
                "unit": context.unit_title,
            })),
        })
    }
}
