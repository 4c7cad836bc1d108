//! JSON file breaker store
//!
//! Persists the breaker status so a pause survives restarts. Saves write a
//! sibling temp file and rename it over the target, so readers only ever
//! see a complete record.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::domain::circuit_breaker::BreakerStatus;
use crate::ports::persistence::{BreakerStateStore, StoreError};

/// Default breaker status file name
pub const DEFAULT_BREAKER_FILE: &str = "breaker_status.json";

#[derive(Debug, Clone)]
pub struct JsonBreakerStore {
    path: PathBuf,
}

impl JsonBreakerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_BREAKER_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl BreakerStateStore for JsonBreakerStore {
    async fn load(&self) -> Result<BreakerStatus, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BreakerStatus::default());
            }
            Err(e) => return Err(StoreError::Unavailable(e.to_string())),
        };

        if content.trim().is_empty() {
            return Ok(BreakerStatus::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            StoreError::Corrupted(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, status: &BreakerStatus) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }

        let content = serde_json::to_string_pretty(status)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self.temp_path();
        fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::debug!(
            "Breaker status saved to {} (paused: {})",
            self.path.display(),
            status.is_paused
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_closed() {
        let dir = TempDir::new().unwrap();
        let store = JsonBreakerStore::new(dir.path().join("breaker.json"));
        let status = store.load().await.unwrap();
        assert!(!status.is_paused);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("breaker.json");
        let store = JsonBreakerStore::new(&path);

        let status = BreakerStatus {
            is_paused: true,
            reason: Some("3 failures for 'scan:ethereum' within 600s".to_string()),
            paused_at: Some(Utc::now()),
            ..BreakerStatus::default()
        };
        store.save(&status).await.unwrap();

        assert!(path.exists());
        assert!(!store.temp_path().exists());

        let reopened = JsonBreakerStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), status);
    }

    #[tokio::test]
    async fn test_corrupted_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("breaker.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonBreakerStore::new(&path);
        assert!(matches!(store.load().await, Err(StoreError::Corrupted(_))));
    }

    #[tokio::test]
    async fn test_persisted_field_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("breaker.json");
        let store = JsonBreakerStore::new(&path);
        store
            .save(&BreakerStatus {
                is_paused: true,
                reason: Some("halt".to_string()),
                ..BreakerStatus::default()
            })
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"isPaused\": true"));
        assert!(raw.contains("\"pausedAt\""));
    }
}
