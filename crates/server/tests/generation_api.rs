//! Submission and polling API tests.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{TestConfig, TestFixture, TEST_API_KEY};
use genqueue_core::{testing::wait_for, ProviderError};

#[tokio::test]
async fn test_submit_returns_task_id() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/generations",
            json!({ "prompt": "a cat in a hat", "outputSize": "1:1" }),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["code"], 200);
    assert_eq!(response.body["message"], "Task created");
    let task_id = response.body["data"]["taskId"].as_str().unwrap();
    assert!(task_id.starts_with("task_"));
    assert_eq!(response.body["data"]["duplicate"], false);
}

#[tokio::test]
async fn test_submit_accepts_provider_field_names() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/generations",
            json!({
                "filesUrl": ["https://cdn.test/source.png"],
                "size": "1:1",
                "nVariants": 1,
                "style": "lego"
            }),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    let task_id = response.body["data"]["taskId"].as_str().unwrap().to_string();
    wait_for(fixture.service.registry(), &task_id, |t| t.external_id.is_some()).await;

    let calls = fixture.provider.recorded_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].source_references, vec!["https://cdn.test/source.png"]);
    assert!(calls[0].prompt.to_lowercase().contains("lego"));
}

#[tokio::test]
async fn test_duplicate_submission_returns_same_task() {
    let fixture = TestFixture::new().await;
    let body = json!({ "prompt": "same", "outputSize": "1:1" });

    let first = fixture.post("/api/v1/generations", body.clone()).await;
    let second = fixture.post("/api/v1/generations", body).await;

    assert_status!(second, StatusCode::OK);
    assert_eq!(first.body["data"]["taskId"], second.body["data"]["taskId"]);
    assert_eq!(second.body["data"]["duplicate"], true);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_raw("/api/v1/generations", "{ not json").await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], 400);
}

#[tokio::test]
async fn test_validation_failures_are_422() {
    let fixture = TestFixture::new().await;

    for body in [
        json!({ "outputSize": "1:1" }),
        json!({ "prompt": "x" }),
        json!({ "prompt": "x", "outputSize": "16:9" }),
        json!({ "prompt": "x", "outputSize": "1:1", "variantCount": 4 }),
        json!({ "prompt": "x", "outputSize": "1:1", "style": "baroque" }),
        json!({ "sourceReferences": ["a", "b"], "outputSize": "1:1" }),
    ] {
        let response = fixture.post("/api/v1/generations", body.clone()).await;
        assert_eq!(
            response.status,
            StatusCode::UNPROCESSABLE_ENTITY,
            "body {} got {}",
            body,
            response.body
        );
        assert_eq!(response.body["code"], 422);
        assert!(response.body.get("data").is_none());
    }

    assert!(fixture.provider.recorded_calls().await.is_empty());
    assert_eq!(fixture.service.stats().await.tasks.total(), 0);
}

#[tokio::test]
async fn test_insufficient_balance_is_402() {
    let fixture = TestFixture::with_config(TestConfig::with_balance(0)).await;

    let response = fixture
        .post(
            "/api/v1/generations",
            json!({ "prompt": "a cat", "outputSize": "1:1" }),
        )
        .await;

    assert_status!(response, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(response.body["code"], 402);
    assert_eq!(fixture.service.stats().await.tasks.total(), 0);
}

#[tokio::test]
async fn test_protected_routes_require_key() {
    let fixture = TestFixture::with_config(TestConfig::with_api_key()).await;
    let body = json!({ "prompt": "a cat", "outputSize": "1:1" });

    let response = fixture.post("/api/v1/generations", body.clone()).await;
    assert_status!(response, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["code"], 401);

    let bearer = format!("Bearer {}", TEST_API_KEY);
    let response = fixture
        .post_with_headers(
            "/api/v1/generations",
            body,
            &[("Authorization", bearer.as_str())],
        )
        .await;
    assert_status!(response, StatusCode::OK);

    // open routes stay open
    assert_status!(fixture.get("/api/v1/health").await, StatusCode::OK);
    assert_status!(fixture.get("/api/v1/styles").await, StatusCode::OK);
}

#[tokio::test]
async fn test_poll_verbose_and_minimal() {
    let fixture = TestFixture::new().await;
    let task_id = fixture.submit("a cat").await;

    let verbose = fixture
        .get(&format!("/api/v1/generations/{}", task_id))
        .await;
    assert_status!(verbose, StatusCode::OK);
    let data = &verbose.body["data"];
    assert!(["pending", "processing"].contains(&data["status"].as_str().unwrap()));
    assert!(data["resultReferences"].as_array().unwrap().is_empty());
    assert!(data["progress"].as_u64().unwrap() <= 95);
    assert!(data["createdAt"].is_string());
    assert_eq!(
        verbose.headers.get("cache-control").unwrap(),
        "private, max-age=2"
    );

    let minimal = fixture
        .get(&format!(
            "/api/v1/generations?taskId={}&responseShape=minimal",
            task_id
        ))
        .await;
    assert_status!(minimal, StatusCode::OK);
    assert!(minimal.body["data"]["s"].is_string());
    assert!(minimal.body["data"].get("status").is_none());
}

#[tokio::test]
async fn test_poll_unknown_is_404() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/generations/task_missing").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert_eq!(response.body["code"], 404);

    let response = fixture.get("/api/v1/generations").await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_provider_error_surfaces_through_polling() {
    let fixture = TestFixture::new().await;
    fixture
        .provider
        .set_next_error(ProviderError::Api {
            status: 429,
            message: "slow down".to_string(),
        })
        .await;

    let task_id = fixture.submit("a cat").await;
    genqueue_core::testing::wait_for_terminal(fixture.service.registry(), &task_id).await;

    let response = fixture
        .get(&format!("/api/v1/generations/{}", task_id))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["data"]["status"], "failed");
    assert!(response.body["data"]["error"]
        .as_str()
        .unwrap()
        .contains("Rate limit"));
    assert_eq!(
        response.headers.get("cache-control").unwrap(),
        "private, max-age=300"
    );
}

#[tokio::test]
async fn test_styles_catalog() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/styles").await;

    assert_status!(response, StatusCode::OK);
    let styles = response.body["styles"].as_array().unwrap();
    let ids: Vec<&str> = styles.iter().map(|s| s["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["ios", "pixel", "lego", "snoopy"]);
    assert!(styles[0]["previewUrl"].as_str().unwrap().starts_with("/styles/"));
}
