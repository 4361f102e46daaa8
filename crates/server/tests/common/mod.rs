//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that builds the router in-process
//! with a mock image provider and in-memory snapshot store, so requests can
//! be driven with `oneshot` without binding a port.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use genqueue_core::{
    config::AuthConfig,
    credits::{CreditLedger, InMemoryLedger, UnmeteredLedger},
    load_config_from_str,
    testing::{MemoryBackupStore, MockProvider},
    ApiKeyAuthenticator, AuthMethod, Authenticator, GenerationService, NoneAuthenticator,
    ProviderChoice,
};
use genqueue_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use genqueue_core::testing::fixtures;

/// API key used when a fixture is built with key auth.
pub const TEST_API_KEY: &str = "test-secret-key";

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/generations", json!({
///         "prompt": "a cat",
///         "outputSize": "1:1"
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock provider - inspect calls, inject failures
    pub provider: Arc<MockProvider>,
    /// Service behind the router, for direct registry checks
    pub service: Arc<GenerationService>,
    /// Snapshot store the service writes to
    pub store: Arc<MemoryBackupStore>,
    /// Temporary directory for the orphan file
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Require `TEST_API_KEY` on protected routes
    pub require_api_key: bool,
    /// Per-requester starting balance; `None` is unmetered
    pub initial_balance: Option<u64>,
}

impl TestConfig {
    pub fn with_api_key() -> Self {
        Self {
            require_api_key: true,
            ..Default::default()
        }
    }

    pub fn with_balance(balance: u64) -> Self {
        Self {
            initial_balance: Some(balance),
            ..Default::default()
        }
    }
}

impl TestFixture {
    /// Create a new test fixture with default mocks.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = load_config_from_str(
            r#"
[auth]
method = "none"

[server]
public_url = "https://gen.test"

[orchestrator]
reconcile_attempts = 5
reconcile_interval_ms = 20
"#,
        )
        .expect("Failed to parse config");
        config.persistence.orphan_path = temp_dir.path().join("orphans.json");
        config.persistence.backup_path = temp_dir.path().join("tasks.json");

        let authenticator: Arc<dyn Authenticator> = if test_config.require_api_key {
            config.auth = AuthConfig {
                method: AuthMethod::ApiKey,
                api_key: Some(TEST_API_KEY.to_string()),
            };
            Arc::new(ApiKeyAuthenticator::new(TEST_API_KEY))
        } else {
            Arc::new(NoneAuthenticator)
        };

        let credits: Arc<dyn CreditLedger> = match test_config.initial_balance {
            Some(balance) => Arc::new(InMemoryLedger::new(balance)),
            None => Arc::new(UnmeteredLedger),
        };

        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryBackupStore::new());
        let service = Arc::new(
            GenerationService::start_with_store(
                &config,
                store.clone(),
                ProviderChoice::Custom(provider.clone()),
                credits,
            )
            .await
            .expect("Failed to start service"),
        );

        let state = Arc::new(AppState::new(config, authenticator, Arc::clone(&service)));
        let router = create_router(state);

        Self {
            router,
            provider,
            service,
            store,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, &[]).await
    }

    /// Send a GET request with extra headers.
    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.request("GET", path, None, headers).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), &[]).await
    }

    /// Send a POST request with JSON body and extra headers.
    pub async fn post_with_headers(
        &self,
        path: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        self.request("POST", path, Some(body), headers).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Submit a generation and return its task id.
    pub async fn submit(&self, prompt: &str) -> String {
        let response = self
            .post(
                "/api/v1/generations",
                serde_json::json!({ "prompt": prompt, "outputSize": "1:1" }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "Body: {}", response.body);
        response.body["data"]["taskId"]
            .as_str()
            .expect("taskId missing")
            .to_string()
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            request_builder = request_builder.header(*name, *value);
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into_owned()))
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
