//! In-memory task registry.
//!
//! The registry is the only owner of task state. Every read hands out a
//! clone; every write goes through [`TaskRegistry::create`] or
//! [`TaskRegistry::update`], which check the task invariants before
//! committing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::{Task, TaskStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {task_id} is {status} and can no longer change")]
    Terminal { task_id: String, status: TaskStatus },

    #[error("Field '{field}' of task {task_id} is immutable")]
    ImmutableField {
        task_id: String,
        field: &'static str,
    },

    #[error("External id {external_id} is already bound to task {task_id}")]
    ExternalIdTaken {
        external_id: String,
        task_id: String,
    },

    #[error("Task {task_id} violates {rule}")]
    Inconsistent {
        task_id: String,
        rule: &'static str,
    },
}

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Processing => self.processing,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    /// external id -> task id
    by_external_id: HashMap<String, String>,
}

impl Inner {
    fn insert(&mut self, task: Task) {
        if let Some(external_id) = &task.external_id {
            self.by_external_id
                .insert(external_id.clone(), task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    fn remove(&mut self, id: &str) -> Option<Task> {
        let task = self.tasks.remove(id)?;
        if let Some(external_id) = &task.external_id {
            self.by_external_id.remove(external_id);
        }
        Some(task)
    }
}

/// Concurrency-safe store of all known tasks.
#[derive(Default)]
pub struct TaskRegistry {
    inner: RwLock<Inner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new task. Fails if a task with the same id already exists.
    pub async fn create(&self, task: Task) -> Result<String, TaskError> {
        check_consistency(&task)?;

        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(TaskError::AlreadyExists(task.id));
        }
        if let Some(external_id) = &task.external_id {
            if let Some(owner) = inner.by_external_id.get(external_id) {
                return Err(TaskError::ExternalIdTaken {
                    external_id: external_id.clone(),
                    task_id: owner.clone(),
                });
            }
        }

        let id = task.id.clone();
        inner.insert(task);
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.inner.read().await.tasks.get(id).cloned()
    }

    /// Atomic read-modify-write.
    ///
    /// The mutator works on a copy; the copy is committed only if it respects
    /// the lifecycle rules. Returns `Ok(None)` when the task is unknown.
    /// Entering a terminal state stamps `completed_at`.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<Option<Task>, TaskError>
    where
        F: FnOnce(&mut Task),
    {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.tasks.get(id) else {
            return Ok(None);
        };

        let mut next = current.clone();
        mutate(&mut next);
        next.version = current.version;
        if next == *current {
            return Ok(Some(next));
        }
        next.version = current.version + 1;

        check_update(current, &mut next)?;

        if next.external_id != current.external_id {
            if let Some(external_id) = &next.external_id {
                if let Some(owner) = inner.by_external_id.get(external_id) {
                    if owner != id {
                        return Err(TaskError::ExternalIdTaken {
                            external_id: external_id.clone(),
                            task_id: owner.clone(),
                        });
                    }
                }
            }
        }

        inner.insert(next.clone());
        Ok(Some(next))
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Option<Task> {
        let inner = self.inner.read().await;
        inner
            .by_external_id
            .get(external_id)
            .and_then(|id| inner.tasks.get(id))
            .cloned()
    }

    /// Copies of every task, oldest first.
    pub async fn snapshot_all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.read().await.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Insert tasks that are not already present. Existing entries always win.
    /// Returns how many were inserted.
    pub async fn restore(&self, tasks: impl IntoIterator<Item = Task>) -> usize {
        let mut inner = self.inner.write().await;
        let mut inserted = 0;
        for task in tasks {
            if inner.tasks.contains_key(&task.id) {
                continue;
            }
            if let Some(external_id) = &task.external_id {
                if inner.by_external_id.contains_key(external_id) {
                    tracing::warn!(
                        task_id = %task.id,
                        external_id = %external_id,
                        "Skipping restored task whose external id is already bound"
                    );
                    continue;
                }
            }
            inner.insert(task);
            inserted += 1;
        }
        inserted
    }

    /// Drop tasks created before `cutoff`. Returns the evicted ids.
    pub async fn evict_created_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .tasks
            .values()
            .filter(|task| task.created_at < cutoff)
            .map(|task| task.id.clone())
            .collect();
        for id in &expired {
            inner.remove(id);
        }
        expired
    }

    pub async fn count_by_status(&self) -> StatusCounts {
        let inner = self.inner.read().await;
        let mut counts = StatusCounts::default();
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.tasks.is_empty()
    }
}

fn check_update(current: &Task, next: &mut Task) -> Result<(), TaskError> {
    let task_id = current.id.clone();

    if current.status.is_terminal() {
        return Err(TaskError::Terminal {
            task_id,
            status: current.status,
        });
    }

    let immutable = [
        ("taskId", next.id != current.id),
        ("requester", next.requester != current.requester),
        ("input", next.input != current.input),
        ("callbackAddress", next.callback_address != current.callback_address),
        ("createdAt", next.created_at != current.created_at),
        ("completedAt", next.completed_at != current.completed_at),
    ];
    if let Some((field, _)) = immutable.iter().find(|(_, changed)| *changed) {
        return Err(TaskError::ImmutableField { task_id, field });
    }

    if current.external_id.is_some() && next.external_id != current.external_id {
        return Err(TaskError::ImmutableField {
            task_id,
            field: "externalId",
        });
    }

    if next.status != current.status && !current.status.can_transition_to(next.status) {
        return Err(TaskError::InvalidTransition {
            task_id,
            from: current.status,
            to: next.status,
        });
    }

    if next.status.is_terminal() {
        next.completed_at = Some(Utc::now());
    }

    check_consistency(next)
}

fn check_consistency(task: &Task) -> Result<(), TaskError> {
    let rule = if !task.result_references.is_empty() && task.status != TaskStatus::Completed {
        Some("results only on completed tasks")
    } else if task.error_detail.is_some() && task.status != TaskStatus::Failed {
        Some("error detail only on failed tasks")
    } else if task.completed_at.is_some() != task.status.is_terminal() {
        Some("completedAt set exactly for terminal tasks")
    } else {
        None
    };

    match rule {
        Some(rule) => Err(TaskError::Inconsistent {
            task_id: task.id.clone(),
            rule,
        }),
        None => Ok(()),
    }
}
