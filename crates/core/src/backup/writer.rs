use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::{BackupCommand, BackupDocument, BackupHandle, BackupStore};
use crate::metrics;
use crate::task::Task;

/// Background task that owns the snapshot and rewrites it on every change.
pub struct BackupWriter {
    rx: mpsc::Receiver<BackupCommand>,
    store: Arc<dyn BackupStore>,
    retention: Duration,
    document: BackupDocument,
    closing: bool,
}

impl BackupWriter {
    pub fn new(
        rx: mpsc::Receiver<BackupCommand>,
        store: Arc<dyn BackupStore>,
        retention: std::time::Duration,
        initial: BackupDocument,
    ) -> Self {
        Self {
            rx,
            store,
            retention: Duration::from_std(retention).unwrap_or(Duration::hours(24)),
            document: initial,
            closing: false,
        }
    }

    /// Consume commands until every handle is dropped or a close is requested.
    ///
    /// Commands that queue up while a write is in progress are folded into
    /// the next write.
    pub async fn run(mut self) {
        tracing::info!(tasks = self.document.len(), "Backup writer started");

        while let Some(first) = self.rx.recv().await {
            let mut waiters = Vec::new();
            let mut dirty = self.apply(first, &mut waiters);
            while let Ok(next) = self.rx.try_recv() {
                dirty |= self.apply(next, &mut waiters);
            }

            if dirty {
                self.write();
            }
            for waiter in waiters {
                let _ = waiter.send(());
            }
            if self.closing {
                break;
            }
        }

        tracing::info!("Backup writer shutting down");
    }

    fn apply(&mut self, command: BackupCommand, waiters: &mut Vec<oneshot::Sender<()>>) -> bool {
        match command {
            BackupCommand::Upsert(task) => {
                let (task_id, version) = (task.id.clone(), task.version);
                let applied = self.document.upsert(*task);
                if !applied {
                    tracing::debug!(task_id = %task_id, version, "Ignored stale task copy");
                }
                applied
            }
            BackupCommand::Trim => true,
            BackupCommand::Close => {
                self.closing = true;
                false
            }
            BackupCommand::Flush(reply) => {
                waiters.push(reply);
                false
            }
        }
    }

    fn write(&mut self) {
        let dropped = self.document.retain_since(Utc::now() - self.retention);
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped expired tasks from snapshot");
        }

        match self.store.save(&self.document) {
            Ok(()) => {
                metrics::BACKUP_WRITES.with_label_values(&["ok"]).inc();
            }
            Err(e) => {
                metrics::BACKUP_WRITES.with_label_values(&["error"]).inc();
                tracing::error!("Failed to write task snapshot: {}", e);
            }
        }
    }
}

/// Create the backup handle and writer.
///
/// `initial_tasks` seeds the writer's copy of the snapshot (normally the tasks
/// restored at startup). Spawn the writer with `tokio::spawn(writer.run())`.
pub fn create_backup_system(
    store: Arc<dyn BackupStore>,
    retention: std::time::Duration,
    buffer_size: usize,
    initial_tasks: Vec<Task>,
) -> (BackupHandle, BackupWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = BackupHandle::new(tx);
    let writer = BackupWriter::new(
        rx,
        store,
        retention,
        BackupDocument::from_tasks(initial_tasks),
    );
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::JsonFileBackupStore;
    use crate::task::TaskStatus;
    use crate::testing::{fixtures, MemoryBackupStore};
    use tempfile::tempdir;

    const DAY: std::time::Duration = std::time::Duration::from_secs(86400);

    #[tokio::test]
    async fn test_upsert_is_written_and_flush_waits() {
        let store = Arc::new(MemoryBackupStore::new());
        let (handle, writer) = create_backup_system(store.clone(), DAY, 16, vec![]);
        let join = tokio::spawn(writer.run());

        let mut task = fixtures::task("a cat");
        handle.persist(&task).await;
        task.status = TaskStatus::Processing;
        handle.persist(&task).await;
        assert!(handle.flush().await);

        let saved = store.current();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved.get(&task.id).unwrap().status, TaskStatus::Processing);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_copy_does_not_overwrite_newer() {
        let store = Arc::new(MemoryBackupStore::new());
        let (handle, writer) = create_backup_system(store.clone(), DAY, 16, vec![]);
        let join = tokio::spawn(writer.run());

        let mut processing = fixtures::task("a cat");
        processing.status = TaskStatus::Processing;
        processing.version = 1;
        let mut completed = processing.clone();
        completed.complete(vec!["https://cdn.test/1.png".to_string()]);
        completed.version = 2;

        // Dispatch and reconciliation raced; the older copy arrives last.
        handle.persist(&completed).await;
        handle.persist(&processing).await;
        assert!(handle.flush().await);

        let saved = store.current();
        let task = saved.get(&completed.id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.version, 2);
        assert_eq!(task.result_references, completed.result_references);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_each_write_applies_retention() {
        let store = Arc::new(MemoryBackupStore::new());
        let mut old = fixtures::task("old");
        old.created_at = Utc::now() - Duration::hours(25);
        let (handle, writer) = create_backup_system(store.clone(), DAY, 16, vec![old.clone()]);
        let join = tokio::spawn(writer.run());

        let fresh = fixtures::task("fresh");
        handle.persist(&fresh).await;
        handle.flush().await;

        let saved = store.current();
        assert!(saved.get(&old.id).is_none());
        assert!(saved.get(&fresh.id).is_some());

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".tasks-backup.json");
        let store = Arc::new(JsonFileBackupStore::new(&path));
        let (handle, writer) = create_backup_system(store.clone(), DAY, 16, vec![]);
        let join = tokio::spawn(writer.run());

        let task = fixtures::task("a cat");
        handle.persist(&task).await;
        drop(handle);
        join.await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get(&task.id), Some(&task));
    }

    #[tokio::test]
    async fn test_close_stops_writer_with_live_handles() {
        let store = Arc::new(MemoryBackupStore::new());
        let (handle, writer) = create_backup_system(store.clone(), DAY, 16, vec![]);
        let join = tokio::spawn(writer.run());
        let other = handle.clone();

        let task = fixtures::task("a cat");
        handle.persist(&task).await;
        handle.close().await;
        join.await.unwrap();

        assert!(store.current().get(&task.id).is_some());
        assert!(!other.flush().await);
    }

    #[tokio::test]
    async fn test_failing_store_keeps_running() {
        let store = Arc::new(MemoryBackupStore::failing());
        let (handle, writer) = create_backup_system(store, DAY, 16, vec![]);
        let join = tokio::spawn(writer.run());

        handle.persist(&fixtures::task("a cat")).await;
        assert!(handle.flush().await);

        drop(handle);
        join.await.unwrap();
    }
}
