//! Filesystem artifact store.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::ArtifactStore;
use crate::errors::{DigestError, Result};

/// Stores artifacts as files, creating parent directories on demand.
///
/// Writes go to a sibling temp file that is renamed over the target, so
/// the checkpoint path only ever holds complete content.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsArtifactStore;

impl FsArtifactStore {
    /// Creates a store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| DigestError::Config(format!("artifact path has no file name: {}", path.display())))?;
    let mut temp = OsString::from(".");
    temp.push(name);
    temp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    Ok(path.with_file_name(temp))
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = temp_path(path)?;
        if let Err(err) = tokio::fs::write(&temp, content).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err.into());
        }

        debug!(path = %path.display(), bytes = content.len(), "Artifact written");
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("course").join("markdown").join("lesson.md");
        let store = FsArtifactStore::new();

        assert!(!store.exists(&path).await.unwrap());
        store.write(&path, "# Lesson").await.unwrap();

        assert!(store.exists(&path).await.unwrap());
        assert_eq!(store.read(&path).await.unwrap(), "# Lesson");
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a_summary.json");
        let store = FsArtifactStore::new();

        store.write(&path, "{}").await.unwrap();
        store.write(&path, r#"{"key_points": []}"#).await.unwrap();

        assert_eq!(store.read(&path).await.unwrap(), r#"{"key_points": []}"#);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsArtifactStore::new()
            .read(&dir.path().join("missing.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::Io(_)));
    }

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let temp = temp_path(Path::new("out/x/a.json")).unwrap();
        assert_eq!(temp.parent(), Some(Path::new("out/x")));
        let name = temp.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(".a.json."));
        assert!(name.ends_with(".tmp"));
        assert!(temp_path(Path::new("/")).is_err());
    }
}
