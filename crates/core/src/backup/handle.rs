use tokio::sync::{mpsc, oneshot};

use crate::task::Task;

/// Instruction for the backup writer.
#[derive(Debug)]
pub enum BackupCommand {
    /// Insert or replace a task in the snapshot.
    Upsert(Box<Task>),
    /// Rewrite the snapshot after applying retention.
    Trim,
    /// Reply once everything sent before this command is on disk.
    Flush(oneshot::Sender<()>),
    /// Write what is pending, then stop the writer.
    Close,
}

/// Cheaply cloneable sender side of the backup writer.
///
/// Persisting never fails the caller: a closed or full channel is logged.
#[derive(Clone)]
pub struct BackupHandle {
    tx: mpsc::Sender<BackupCommand>,
}

impl BackupHandle {
    pub fn new(tx: mpsc::Sender<BackupCommand>) -> Self {
        Self { tx }
    }

    /// Queue the current state of `task` for the snapshot.
    pub async fn persist(&self, task: &Task) {
        if let Err(e) = self
            .tx
            .send(BackupCommand::Upsert(Box::new(task.clone())))
            .await
        {
            tracing::error!(task_id = %task.id, "Failed to queue task backup: {}", e);
        }
    }

    /// Non-waiting variant of [`persist`](Self::persist). Returns false if the
    /// command could not be queued.
    pub fn try_persist(&self, task: &Task) -> bool {
        match self
            .tx
            .try_send(BackupCommand::Upsert(Box::new(task.clone())))
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(task_id = %task.id, "Failed to queue task backup: {}", e);
                false
            }
        }
    }

    pub async fn trim(&self) {
        if let Err(e) = self.tx.send(BackupCommand::Trim).await {
            tracing::error!("Failed to queue backup trim: {}", e);
        }
    }

    /// Wait until every command queued so far has been written.
    /// Returns false if the writer is gone.
    pub async fn flush(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(BackupCommand::Flush(reply_tx)).await.is_err() {
            return false;
        }
        reply_rx.await.is_ok()
    }

    /// Ask the writer to write what it has and exit. Commands sent after
    /// this are dropped.
    pub async fn close(&self) {
        if self.tx.send(BackupCommand::Close).await.is_err() {
            tracing::debug!("Backup writer already stopped");
        }
    }
}
