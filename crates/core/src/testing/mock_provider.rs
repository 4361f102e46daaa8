//! Mock image provider for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::provider::{ImageProvider, ProviderError, ProviderRequest, ProviderSubmission};

/// Mock implementation of the [`ImageProvider`] trait.
///
/// Accepts every request and hands out sequential external ids
/// (`mock-ext-1`, `mock-ext-2`, ...). Nothing is ever delivered back; tests
/// feed webhooks to the reconciler themselves.
///
/// # Example
///
/// ```rust,ignore
/// let provider = MockProvider::new();
/// provider.set_next_error(ProviderError::NotConfigured).await;
///
/// assert!(provider.submit(&request).await.is_err());
/// assert_eq!(provider.submit(&request).await?.external_id, "mock-ext-1");
/// assert_eq!(provider.recorded_calls().await.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MockProvider {
    /// Every request received, in order.
    calls: Arc<RwLock<Vec<ProviderRequest>>>,
    /// If set, the next submit fails with this error.
    next_error: Arc<RwLock<Option<ProviderError>>>,
    /// Simulated latency per submit.
    delay: Arc<RwLock<Option<Duration>>>,
    counter: AtomicU64,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded_calls(&self) -> Vec<ProviderRequest> {
        self.calls.read().await.clone()
    }

    pub async fn set_next_error(&self, error: ProviderError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }
}

#[async_trait]
impl ImageProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, request: &ProviderRequest) -> Result<ProviderSubmission, ProviderError> {
        self.calls.write().await.push(request.clone());

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderSubmission {
            external_id: format!("mock-ext-{}", n),
        })
    }
}
