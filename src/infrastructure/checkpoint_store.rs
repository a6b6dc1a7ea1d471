//! Crawl checkpoint persistence
//!
//! A single JSON file at a fixed path. Writes go to a sibling temp file and
//! are renamed into place so a crash mid-write never leaves a torn checkpoint.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::domain::crawl_state::CrawlCheckpoint;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(ToOwned::to_owned).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Returns `None` when the file is missing or unreadable; the latter is logged
    pub async fn load(&self) -> Option<CrawlCheckpoint> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint at {:?}", self.path);
                return None;
            }
            Err(e) => {
                warn!("⚠️ Could not read checkpoint {:?}: {} (starting fresh)", self.path, e);
                return None;
            }
        };

        match serde_json::from_str::<CrawlCheckpoint>(&content) {
            Ok(checkpoint) => {
                info!(
                    "🔄 Loaded checkpoint: last page {}, {} records",
                    checkpoint.last_page_index, checkpoint.accumulated_record_count
                );
                Some(checkpoint)
            }
            Err(e) => {
                warn!("⚠️ Checkpoint {:?} is corrupt: {} (starting fresh)", self.path, e);
                None
            }
        }
    }

    pub async fn save(&self, checkpoint: &CrawlCheckpoint) -> Result<(), CheckpointError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(|e| self.io_error(e))?;
        }

        let content = serde_json::to_vec_pretty(checkpoint)?;
        let temp_path = self.temp_path();
        fs::write(&temp_path, content).await.map_err(|e| self.io_error(e))?;
        fs::rename(&temp_path, &self.path).await.map_err(|e| self.io_error(e))?;

        debug!(
            "💾 Checkpoint saved: last page {}, {} records",
            checkpoint.last_page_index, checkpoint.accumulated_record_count
        );
        Ok(())
    }

    /// Removes the checkpoint; a missing file is not an error
    pub async fn clear(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("🧹 Checkpoint removed: {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::{DedupKey, ProductRecord};
    use chrono::Utc;
    use tempfile::tempdir;

    fn checkpoint() -> CrawlCheckpoint {
        let record = ProductRecord::new("https://shop.test/product/a", "Lamp");
        CrawlCheckpoint {
            last_page_index: 7,
            seen_keys: vec![record.dedup_key(), DedupKey::Name("fan".to_string())],
            accumulated_record_count: 1,
            timestamp: Utc::now(),
            elapsed_so_far_secs: 12.5,
            start_url: Some("https://shop.test/shop/".to_string()),
            records: vec![record],
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("state").join("checkpoint.json"));

        assert!(store.load().await.is_none());
        let saved = checkpoint();
        store.save(&saved).await.unwrap();

        assert_eq!(store.load().await, Some(saved));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{\"last_page_index\": \"seven\"").unwrap();

        let store = CheckpointStore::new(&path);
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        store.save(&checkpoint()).await.unwrap();

        store.clear().await.unwrap();
        assert!(!store.path().exists());
        store.clear().await.unwrap();
    }
}
