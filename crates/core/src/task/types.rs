//! Core task data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::styles::Style;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle state of a task.
///
/// ```text
/// pending ──> processing ──> completed
///    │             │
///    └─────────────┴───────> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Input
// ============================================================================

/// Aspect ratio of generated images. Only square output is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputSize {
    #[default]
    #[serde(rename = "1:1")]
    Square,
}

impl OutputSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSize::Square => "1:1",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "1:1" => Some(OutputSize::Square),
            _ => None,
        }
    }
}

/// Validated submission input. Immutable once the task exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSpec {
    /// Prompt as supplied by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Prompt actually sent to the provider (the style template when a
    /// style is chosen).
    pub provider_prompt: String,
    #[serde(default)]
    pub source_references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_reference: Option<String>,
    #[serde(default)]
    pub output_size: OutputSize,
    pub variant_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Style>,
}

// ============================================================================
// Task
// ============================================================================

/// One generation job, owned by the [`TaskRegistry`](super::TaskRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "taskId")]
    pub id: String,
    pub requester: String,
    /// Provider-assigned id, written once the provider accepts the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub status: TaskStatus,
    pub input: InputSpec,
    pub callback_address: String,
    #[serde(default)]
    pub result_references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Bumped by the registry on every committed update. Copies persisted
    /// out of order are ordered by it.
    #[serde(default)]
    pub version: u64,
}

impl Task {
    /// A fresh `pending` task with a newly generated id.
    pub fn new(requester: impl Into<String>, input: InputSpec, callback_address: String) -> Self {
        Self {
            id: generate_task_id(),
            requester: requester.into(),
            external_id: None,
            status: TaskStatus::Pending,
            input,
            callback_address,
            result_references: Vec::new(),
            error_detail: None,
            created_at: Utc::now(),
            completed_at: None,
            version: 0,
        }
    }

    /// Mark completed with the given results. The registry stamps `completed_at`.
    pub fn complete(&mut self, results: Vec<String>) {
        self.status = TaskStatus::Completed;
        self.result_references = results;
        self.error_detail = None;
    }

    /// Mark failed with a human-readable reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.result_references.clear();
        self.error_detail = Some(reason.into());
    }
}

fn generate_task_id() -> String {
    format!("task_{}", uuid::Uuid::new_v4().simple())
}
