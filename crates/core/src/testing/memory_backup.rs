//! Snapshot store kept in memory.

use std::sync::{Mutex, PoisonError};

use crate::backup::{BackupDocument, BackupError, BackupStore};
use crate::task::Task;

/// [`BackupStore`] that keeps the last saved document in memory.
///
/// `failing()` builds one whose saves always error, for exercising the
/// writer's error path.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    document: Mutex<BackupDocument>,
    saves: Mutex<usize>,
    fail_saves: bool,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `tasks`, as if written by a previous run.
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            document: Mutex::new(BackupDocument::from_tasks(tasks)),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    /// The last document saved.
    pub fn current(&self) -> BackupDocument {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BackupStore for MemoryBackupStore {
    fn load(&self) -> Result<BackupDocument, BackupError> {
        Ok(self.current())
    }

    fn save(&self, document: &BackupDocument) -> Result<(), BackupError> {
        if self.fail_saves {
            return Err(BackupError::Io {
                path: "<memory>".to_string(),
                source: std::io::Error::other("simulated write failure"),
            });
        }
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = document.clone();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
