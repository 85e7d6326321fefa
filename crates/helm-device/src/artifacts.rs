//! Screenshot storage.
//!
//! Captures land in a single directory as `<prefix>_<uuid>.png`. Results carry
//! the image content as base64; the files are only kept until cleanup.

use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use helm_config::StorageConfig;
use helm_core::{HelmError, Result};

pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.artifact_dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh file path for a capture. Creates the directory if needed.
    pub async fn next_path(&self, prefix: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!("{prefix}_{}.png", uuid::Uuid::new_v4().simple());
        Ok(self.dir.join(name))
    }

    /// Read a capture written by a backend and return it as base64.
    pub async fn load_base64(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(HelmError::Unexpected(format!(
                "empty capture at {}",
                path.display()
            )));
        }
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Persist base64 PNG data received from a device. Returns the file path.
    pub async fn store_base64(&self, prefix: &str, data: &str) -> Result<PathBuf> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| HelmError::Unexpected(format!("invalid base64 screenshot data: {e}")))?;
        let path = self.next_path(prefix).await?;
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "capture stored");
        Ok(path)
    }

    /// Delete captures older than `max_age`. Returns how many were removed.
    pub async fn cleanup_expired(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        self.remove_where(|modified| {
            now.duration_since(modified).unwrap_or_default() > max_age
        })
        .await
    }

    /// Delete every capture.
    pub async fn purge(&self) -> Result<usize> {
        self.remove_where(|_| true).await
    }

    async fn remove_where(&self, expired: impl Fn(SystemTime) -> bool) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "artifact listing stopped early");
                    break;
                }
            };
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "skipping artifact");
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if !expired(modified) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "could not remove artifact"),
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "artifacts cleaned up");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path().join("artifacts"));
        let data = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG fake");

        let path = store.store_base64("mobile", &data).await.unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("mobile_"));
        assert_eq!(store.load_base64(&path).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_invalid_base64_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        assert!(store.store_base64("x", "not base64!!").await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_fresh_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let path = store.next_path("desktop").await.unwrap();
        tokio::fs::write(&path, b"png").await.unwrap();

        assert_eq!(store.cleanup_expired(Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(path.exists());

        assert_eq!(store.purge().await.unwrap(), 1);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_purge_skips_entries_that_are_not_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let path = store.next_path("desktop").await.unwrap();
        tokio::fs::write(&path, b"png").await.unwrap();
        tokio::fs::create_dir(tmp.path().join("nested")).await.unwrap();
        std::os::unix::fs::symlink(tmp.path().join("gone.png"), tmp.path().join("dangling.png"))
            .unwrap();

        assert_eq!(store.purge().await.unwrap(), 1);
        assert!(!path.exists());
        assert!(tmp.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_cleanup_missing_dir_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path().join("never-created"));
        assert_eq!(store.purge().await.unwrap(), 0);
    }
}
