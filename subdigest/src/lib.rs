//! # Subdigest
//!
//! A bounded-concurrency job engine that downloads video subtitles and turns
//! them into study material with an LLM.
//!
//! Subdigest provides:
//!
//! - **Job queue and worker pool**: submit many videos, at most N run at once
//! - **Task registry**: poll state, progress and results of every task
//! - **Cooperative stop**: stop requests land at the next checkpoint
//! - **Checkpointed steps**: existing artifacts are reused, so reruns resume
//! - **Resilient remote calls**: per-attempt timeouts, backoff and pacing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use subdigest::prelude::*;
//!
//! let service = DigestService::builder()
//!     .config(EngineConfig::default())
//!     .source(Arc::new(BilibiliSourceClient::new(credentials)))
//!     .enrichment(Arc::new(OpenAiCompatClient::new(catalog)))
//!     .build()?;
//!
//! let id = service.submit(TaskRequest::new(url, "subtitles", "default"))?;
//! let status = service.wait_for(id, Duration::from_millis(500)).await?;
//! println!("{}: {}", status.state, status.message);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod clients;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod subtitle;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::clients::{
        ArtifactStore, EnrichmentClient, FsArtifactStore, GenerationContext,
        MemoryArtifactStore, ResourceMetadata, SourceClient, SourceUnit,
    };
    #[cfg(feature = "http")]
    pub use crate::clients::{BilibiliSourceClient, OpenAiCompatClient};
    pub use crate::config::{AppConfig, EngineConfig, ModelCatalog, SourceCredentials};
    pub use crate::core::{
        ArtifactContent, ResultBag, StepKind, TaskId, TaskRequest, TaskState, TaskStatus,
    };
    pub use crate::errors::{DigestError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{ResilientCaller, RetryPolicy};
    pub use crate::registry::{InMemoryTaskRegistry, RetentionPolicy, TaskRegistry};
    pub use crate::service::{DigestService, DigestServiceBuilder};
    pub use crate::subtitle::Transcript;
    pub use crate::utils::{now_utc, Timestamp};
}
