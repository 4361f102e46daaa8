//! Holding area for webhook results that never matched a task.
//!
//! Orphans are diagnostic only. They are persisted so an operator can inspect
//! them after a restart, and purged once they pass their TTL.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backup::{read_json_or_default, write_json_atomic, BackupError};

#[derive(Debug, Error)]
pub enum OrphanError {
    #[error("Orphan store persistence failed: {0}")]
    Persistence(#[from] BackupError),

    #[error("Orphan store write task failed: {0}")]
    WriteTask(#[from] tokio::task::JoinError),
}

/// A webhook result with no matching task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanResult {
    pub external_id: String,
    pub result_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The webhook body as received.
    pub payload: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

pub struct OrphanStore {
    entries: Mutex<Vec<OrphanResult>>,
    path: Option<PathBuf>,
}

impl OrphanStore {
    /// Open a file-backed store, loading whatever is already on disk.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, OrphanError> {
        let path = path.into();
        let entries: Vec<OrphanResult> = read_json_or_default(&path)?;
        Ok(Self {
            entries: Mutex::new(entries),
            path: Some(path),
        })
    }

    /// Empty store that writes to `path`, discarding whatever is there.
    pub fn empty_at(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            path: Some(path.into()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Append an orphan and rewrite the file.
    ///
    /// The entry stays in memory even when the write fails.
    pub async fn save(&self, orphan: OrphanResult) -> Result<(), OrphanError> {
        let mut entries = self.entries.lock().await;
        entries.push(orphan);
        self.write(&entries).await
    }

    pub async fn list(&self) -> Vec<OrphanResult> {
        self.entries.lock().await.clone()
    }

    pub async fn find(&self, external_id: &str) -> Vec<OrphanResult> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|o| o.external_id == external_id)
            .cloned()
            .collect()
    }

    /// Remove orphans saved more than `ttl` before `now`. Returns the count.
    pub async fn sweep_at(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize, OrphanError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|o| now - o.saved_at < ttl);
        let removed = before - entries.len();
        if removed > 0 {
            self.write(&entries).await?;
        }
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Rewrite the file on the blocking pool. Callers hold the entries lock
    /// across the await so writes land in order.
    async fn write(&self, entries: &[OrphanResult]) -> Result<(), OrphanError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let snapshot = entries.to_vec();
        tokio::task::spawn_blocking(move || write_json_atomic(&path, &snapshot)).await??;
        Ok(())
    }
}
