//! Testing utilities and in-memory stand-ins for the external seams.
//!
//! Used by the unit tests in this crate and by the server's integration
//! tests, so generation flows can be driven end to end without a real
//! provider or snapshot file.
//!
//! # Example
//!
//! ```rust,ignore
//! use genqueue_core::testing::{fixtures, MockProvider, MemoryBackupStore};
//!
//! let provider = Arc::new(MockProvider::new());
//! provider.set_next_error(ProviderError::Api { status: 429, message: "slow down".into() }).await;
//!
//! // submit, then inspect what the provider saw
//! let calls = provider.recorded_calls().await;
//! ```

mod memory_backup;
mod mock_provider;

pub use memory_backup::MemoryBackupStore;
pub use mock_provider::MockProvider;

use std::time::Duration;

use crate::task::{Task, TaskRegistry, TaskStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const POLL_ATTEMPTS: usize = 200;

/// Poll the registry until the task satisfies `predicate`.
///
/// Panics after about two seconds.
pub async fn wait_for<F>(registry: &TaskRegistry, task_id: &str, predicate: F) -> Task
where
    F: Fn(&Task) -> bool,
{
    let mut last = None;
    for _ in 0..POLL_ATTEMPTS {
        if let Some(task) = registry.get(task_id).await {
            if predicate(&task) {
                return task;
            }
            last = Some(task);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("Task {} never reached the expected state, last seen: {:?}", task_id, last);
}

pub async fn wait_for_status(registry: &TaskRegistry, task_id: &str, status: TaskStatus) -> Task {
    wait_for(registry, task_id, |t| t.status == status).await
}

pub async fn wait_for_terminal(registry: &TaskRegistry, task_id: &str) -> Task {
    wait_for(registry, task_id, |t| t.status.is_terminal()).await
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::submission::SubmitRequest;
    use crate::task::{InputSpec, OutputSize, Task};

    /// A pending single-variant task for `prompt`, owned by `alice`.
    pub fn task(prompt: &str) -> Task {
        Task::new(
            "alice",
            InputSpec {
                prompt: Some(prompt.to_string()),
                provider_prompt: prompt.to_string(),
                source_references: Vec::new(),
                mask_reference: None,
                output_size: OutputSize::Square,
                variant_count: 1,
                style: None,
            },
            "http://localhost:8080/api/v1/webhooks/provider".to_string(),
        )
    }

    /// A minimal valid submission body.
    pub fn submit_request(prompt: &str) -> SubmitRequest {
        SubmitRequest {
            prompt: Some(prompt.to_string()),
            output_size: Some("1:1".to_string()),
            ..Default::default()
        }
    }

    /// Provider webhook body in the provider's own field names.
    pub fn webhook_body(external_id: &str, code: i64, result_urls: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "code": code,
            "msg": if code == 200 { "success" } else { "failed" },
            "data": {
                "taskId": external_id,
                "info": { "result_urls": result_urls }
            }
        })
    }
}
