//! In-memory artifact store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

use super::ArtifactStore;
use crate::errors::Result;

/// Artifact store backed by a concurrent map. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    files: DashMap<PathBuf, String>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Every stored path, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Removes an artifact, returning its content.
    pub fn remove(&self, path: &Path) -> Option<String> {
        self.files.remove(path).map(|(_, content)| content)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.files.contains_key(path))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        self.files.insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<String> {
        self.files.get(path).map(|c| c.value().clone()).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no artifact at {}", path.display()),
            )
            .into()
        })
    }
}
