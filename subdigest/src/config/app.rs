//! Application settings file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::engine::EngineConfig;
use crate::errors::{DigestError, Result};
use crate::observability::LogFormat;
use crate::pipeline::RetryPolicy;
use crate::registry::RetentionPolicy;

/// Contents of `config/app_config.json`. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory artifacts are written under.
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    /// Profile used when a run does not name one.
    #[serde(default)]
    pub last_selected_model: String,
    /// Cookie file for the video platform.
    #[serde(default = "default_cookies_file")]
    pub cookies_file: PathBuf,
    /// Model catalog file.
    #[serde(default = "default_models_file")]
    pub models_file: PathBuf,
    /// Process every part of multi-part videos by default.
    #[serde(default)]
    pub download_all_parts: bool,
    /// Worker count.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Pause after each task, in milliseconds.
    #[serde(default = "default_worker_cooldown_ms")]
    pub worker_cooldown_ms: u64,
    /// Registry retention.
    #[serde(default)]
    pub retention: RetentionPolicy,
    /// Policy for video platform calls.
    #[serde(default = "RetryPolicy::source")]
    pub source_retry: RetryPolicy,
    /// Policy for enrichment calls.
    #[serde(default = "RetryPolicy::enrichment")]
    pub enrichment_retry: RetryPolicy,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("subtitles")
}

fn default_cookies_file() -> PathBuf {
    PathBuf::from("cookies.txt")
}

fn default_models_file() -> PathBuf {
    PathBuf::from("config/llm_models.json")
}

fn default_max_concurrent_tasks() -> usize {
    2
}

fn default_worker_cooldown_ms() -> u64 {
    2000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            last_selected_model: String::new(),
            cookies_file: default_cookies_file(),
            models_file: default_models_file(),
            download_all_parts: false,
            max_concurrent_tasks: default_max_concurrent_tasks(),
            worker_cooldown_ms: default_worker_cooldown_ms(),
            retention: RetentionPolicy::default(),
            source_retry: RetryPolicy::source(),
            enrichment_retry: RetryPolicy::enrichment(),
            log_format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Loads the settings file.
    ///
    /// A missing file is created with defaults. An unreadable or malformed
    /// file is reported and replaced by defaults in memory only.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!(path = %path.display(), "Wrote default configuration");
            return Ok(config);
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(DigestError::from)
            .and_then(|text| Ok(serde_json::from_str::<Self>(&text)?));

        match parsed {
            Ok(config) => Ok(config),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to load configuration, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Writes the settings file, creating its directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Engine settings derived from this file.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_workers(self.max_concurrent_tasks)
            .with_cooldown_ms(self.worker_cooldown_ms)
            .with_retention(self.retention)
            .with_source_retry(self.source_retry.clone())
            .with_enrichment_retry(self.enrichment_retry.clone())
    }
}
