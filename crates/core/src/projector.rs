//! Rendering tasks for status polling.
//!
//! One canonical [`Task`] is rendered into either the verbose or the minimal
//! poll response. In-flight tasks carry an estimated progress that never
//! reaches 100 until the task actually completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::task::{Task, TaskStatus};

/// Progress ceiling for tasks that are still running.
pub const MAX_IN_FLIGHT_PROGRESS: u8 = 95;

/// Longest error text in the minimal shape.
pub const MINIMAL_ERROR_LEN: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    #[default]
    Verbose,
    Minimal,
}

/// Poll response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusView {
    #[serde(rename_all = "camelCase")]
    Verbose {
        status: TaskStatus,
        result_references: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
        created_at: DateTime<Utc>,
    },
    Minimal {
        s: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        u: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        e: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        p: Option<u8>,
    },
}

/// How long a client may cache a poll response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_age_secs: u32,
}

impl CachePolicy {
    pub fn header_value(&self) -> String {
        format!("private, max-age={}", self.max_age_secs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub view: StatusView,
    pub cache: CachePolicy,
}

/// Renders tasks into poll responses.
#[derive(Debug, Clone)]
pub struct StatusProjector {
    estimated_total: Duration,
    terminal_max_age: u32,
    in_flight_max_age: u32,
}

impl Default for StatusProjector {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl StatusProjector {
    pub fn new(estimated_total: Duration) -> Self {
        Self {
            estimated_total,
            terminal_max_age: 300,
            in_flight_max_age: 2,
        }
    }

    pub fn project(&self, task: &Task, shape: ResponseShape) -> Projection {
        self.project_at(task, shape, Utc::now())
    }

    pub fn project_at(&self, task: &Task, shape: ResponseShape, now: DateTime<Utc>) -> Projection {
        let progress = self.progress(task, now);

        let view = match shape {
            ResponseShape::Verbose => StatusView::Verbose {
                status: task.status,
                result_references: task.result_references.clone(),
                error: task.error_detail.clone(),
                progress,
                created_at: task.created_at,
            },
            ResponseShape::Minimal => StatusView::Minimal {
                s: task.status,
                u: task.result_references.first().cloned(),
                e: task
                    .error_detail
                    .as_deref()
                    .map(|e| e.chars().take(MINIMAL_ERROR_LEN).collect()),
                p: progress,
            },
        };

        let max_age_secs = if task.status.is_terminal() {
            self.terminal_max_age
        } else {
            self.in_flight_max_age
        };

        Projection {
            view,
            cache: CachePolicy { max_age_secs },
        }
    }

    /// `min(round(elapsed / estimated * 100), 95)` for running tasks.
    fn progress(&self, task: &Task, now: DateTime<Utc>) -> Option<u8> {
        if task.status.is_terminal() {
            return None;
        }

        let elapsed = (now - task.created_at).num_milliseconds().max(0) as f64;
        let total = self.estimated_total.as_millis().max(1) as f64;
        let pct = (elapsed / total * 100.0).round();
        Some(pct.min(MAX_IN_FLIGHT_PROGRESS as f64) as u8)
    }
}
