//! Collaborators the pipeline talks to: the video source, the enrichment
//! backend and the artifact store.
//!
//! The pipeline only sees the traits; concrete adapters live in the
//! submodules. Network adapters are behind the `http` feature.

mod fs;
mod memory;

#[cfg(feature = "http")]
mod bilibili;
#[cfg(feature = "http")]
mod openai;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

#[cfg(feature = "http")]
pub use bilibili::{parse_resource_url, BilibiliSourceClient};
#[cfg(feature = "http")]
pub use openai::{extract_json_block, OpenAiCompatClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::{ArtifactContent, StepKind};
use crate::errors::Result;
use crate::subtitle::Transcript;

/// Resource-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Platform id of the resource.
    pub id: String,
    /// Resource title.
    pub title: String,
    /// Part explicitly requested by the resource identifier (1-based).
    pub requested_part: Option<u32>,
    /// Cover image URL, if any.
    pub cover_url: Option<String>,
}

/// One part of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Id of the owning resource.
    pub resource_id: String,
    /// Platform key used to fetch the unit's transcript.
    pub key: String,
    /// 1-based part number.
    pub index: u32,
    /// Part title.
    pub title: String,
}

/// Context handed to the enrichment backend with every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationContext {
    /// Processing profile (model) name.
    pub profile: String,
    /// Resource title.
    pub resource_title: String,
    /// Unit title.
    pub unit_title: String,
}

/// Where transcripts come from.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Resolves a resource identifier. Absent resources yield `NotFound`.
    async fn fetch_metadata(&self, resource: &str) -> Result<ResourceMetadata>;

    /// Lists the parts of a resource in order.
    async fn fetch_units(&self, metadata: &ResourceMetadata) -> Result<Vec<SourceUnit>>;

    /// Downloads a part's transcript. Parts without one yield `NotFound`.
    async fn fetch_asset(&self, unit: &SourceUnit) -> Result<Transcript>;
}

/// Generates one artifact per step kind.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    /// Produces the artifact for `step` from the unit's transcript text.
    async fn generate(
        &self,
        step: StepKind,
        text: &str,
        context: &GenerationContext,
    ) -> Result<ArtifactContent>;
}

/// Path-addressed artifact persistence.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns true if an artifact exists at `path`.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Writes `content` at `path`. A concurrent reader sees either the old
    /// content or the new one, never a partial file.
    async fn write(&self, path: &Path, content: &str) -> Result<()>;

    /// Reads the artifact at `path`.
    async fn read(&self, path: &Path) -> Result<String>;
}
