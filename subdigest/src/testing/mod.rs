//! Testing utilities for the digest engine.
//!
//! This module provides:
//! - A scripted video source with failure and latency injection
//! - A recording enrichment backend with a concurrency gauge

mod mocks;

pub use mocks::{transcript_of, GenerateCall, RecordingEnrichmentClient, ScriptedSourceClient};
