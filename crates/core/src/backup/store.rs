use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::task::Task;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The whole snapshot: task id to task, with ISO-8601 timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupDocument {
    tasks: BTreeMap<String, Task>,
}

impl BackupDocument {
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    /// Insert or replace `task`, unless the stored copy is newer.
    /// Returns false when the copy was stale and ignored.
    pub fn upsert(&mut self, task: Task) -> bool {
        if let Some(stored) = self.tasks.get(&task.id) {
            if stored.version > task.version {
                return false;
            }
        }
        self.tasks.insert(task.id.clone(), task);
        true
    }

    /// Drop tasks created before `cutoff`. Returns how many were dropped.
    pub fn retain_since(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| task.created_at >= cutoff);
        before - self.tasks.len()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks.into_values().collect()
    }
}

/// Where snapshots are read from and written to.
pub trait BackupStore: Send + Sync {
    /// Read the snapshot. A missing snapshot is an empty document.
    fn load(&self) -> Result<BackupDocument, BackupError>;

    /// Replace the snapshot with `document`.
    fn save(&self, document: &BackupDocument) -> Result<(), BackupError>;
}

/// Snapshot kept as a single JSON file.
pub struct JsonFileBackupStore {
    path: PathBuf,
}

impl JsonFileBackupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackupStore for JsonFileBackupStore {
    fn load(&self) -> Result<BackupDocument, BackupError> {
        read_json_or_default(&self.path)
    }

    fn save(&self, document: &BackupDocument) -> Result<(), BackupError> {
        write_json_atomic(&self.path, document)
    }
}

/// Parse a JSON file, treating a missing file as the default value.
pub(crate) fn read_json_or_default<T>(path: &Path) -> Result<T, BackupError>
where
    T: DeserializeOwned + Default,
{
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(BackupError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    serde_json::from_slice(&bytes).map_err(|source| BackupError::Malformed {
        path: path.display().to_string(),
        source,
    })
}

/// Write `value` as pretty JSON through a temp file and rename, so readers
/// never observe a half-written file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), BackupError> {
    let io_err = |source| BackupError::Io {
        path: path.display().to_string(),
        source,
    };

    let json = serde_json::to_vec_pretty(value).map_err(|source| BackupError::Malformed {
        path: path.display().to_string(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use chrono::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileBackupStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = JsonFileBackupStore::new(dir.path().join("nested/backup.json"));
        let task = fixtures::task("a cat");
        let doc = BackupDocument::from_tasks(vec![task.clone()]);

        store.save(&doc).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.get(&task.id), Some(&task));
        assert!(!dir.path().join("nested/backup.json.tmp").exists());
    }

    #[test]
    fn test_document_is_keyed_by_task_id() {
        let task = fixtures::task("a cat");
        let doc = BackupDocument::from_tasks(vec![task.clone()]);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json[&task.id]["taskId"], task.id.as_str());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.json");
        fs::write(&path, b"{ not json").unwrap();

        let result = JsonFileBackupStore::new(&path).load();
        assert!(matches!(result, Err(BackupError::Malformed { .. })));
    }

    #[test]
    fn test_retain_since_drops_old_tasks() {
        let mut old = fixtures::task("old");
        old.created_at = Utc::now() - Duration::hours(30);
        let fresh = fixtures::task("fresh");
        let mut doc = BackupDocument::from_tasks(vec![old.clone(), fresh.clone()]);

        let dropped = doc.retain_since(Utc::now() - Duration::hours(24));

        assert_eq!(dropped, 1);
        assert!(doc.get(&old.id).is_none());
        assert!(doc.get(&fresh.id).is_some());
    }
}
