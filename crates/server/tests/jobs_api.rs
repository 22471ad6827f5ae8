//! HTTP API tests against an in-memory store and mock collaborators.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use slidesmith_core::config::{
    ArtifactConfig, Config, DatabaseConfig, ImageModelConfig, ServerConfig, TextBackend,
    TextModelConfig,
};
use slidesmith_core::dispatch::DispatchConfig;
use slidesmith_core::job::{JobStore, SqliteJobStore};
use slidesmith_core::pipeline::{JobRunner, PipelineConfig, StageExecutors};
use slidesmith_core::testing::{
    MemoryObjectStore, MockDeckCompiler, MockImageGenerator, MockTextGenerator,
};
use slidesmith_core::JobDispatcher;
use slidesmith_server::api::create_router;
use slidesmith_server::state::AppState;

struct TestApp {
    router: Router,
    store: Arc<SqliteJobStore>,
    runner: Arc<JobRunner>,
}

fn test_config() -> Config {
    Config {
        server: ServerConfig::default(),
        database: DatabaseConfig::default(),
        artifacts: ArtifactConfig::default(),
        pipeline: PipelineConfig::default(),
        dispatch: DispatchConfig::default(),
        text_model: TextModelConfig {
            backend: TextBackend::Anthropic,
            model: "claude-3-haiku-20240307".to_string(),
            api_key: Some("test-key".to_string()),
            api_base: None,
        },
        image_model: ImageModelConfig {
            model: "dall-e-3".to_string(),
            api_key: "test-key".to_string(),
            api_base: None,
            size: "1024x1024".to_string(),
        },
    }
}

fn test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(SqliteJobStore::in_memory().unwrap());
    let objects = Arc::new(MemoryObjectStore::new());

    let executors = Arc::new(StageExecutors::new(
        Arc::new(MockTextGenerator::new()),
        Arc::new(MockImageGenerator::new()),
        Arc::new(MockDeckCompiler::new()),
        Arc::clone(&objects) as _,
        config.pipeline.clone(),
    ));
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&store) as _,
        executors,
        config.pipeline.clone(),
    ));

    // The dispatcher is intentionally left unstarted so tests control when
    // jobs advance; enqueue still succeeds.
    let dispatcher = Arc::new(JobDispatcher::new(config.dispatch.clone()));

    let state = Arc::new(AppState::new(
        config,
        Arc::clone(&store) as _,
        objects as _,
        dispatcher,
    ));
    let router = create_router(state);

    TestApp {
        router,
        store,
        runner,
    }
}

async fn request(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, value)
}

#[tokio::test]
async fn test_submit_job_returns_accepted() {
    let app = test_app();

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/v1/jobs",
        Some(json!({"topic": "rust async runtimes", "slide_count": 3})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["slide_count"], 3);
    assert_eq!(body["progress_percent"], 0);
    assert!(body["id"].as_str().is_some());
}

#[tokio::test]
async fn test_submit_rejects_empty_topic() {
    let app = test_app();

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/v1/jobs",
        Some(json!({"topic": "   ", "slide_count": 3})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("topic"));
}

#[tokio::test]
async fn test_submit_rejects_bad_slide_count() {
    let app = test_app();

    for slide_count in [0, 101] {
        let (status, _) = request(
            &app.router,
            "POST",
            "/api/v1/jobs",
            Some(json!({"topic": "whales", "slide_count": slide_count})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "slide_count {}", slide_count);
    }
}

#[tokio::test]
async fn test_get_unknown_job_returns_404() {
    let app = test_app();

    let (status, _) = request(&app.router, "GET", "/api/v1/jobs/nonexistent", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_job_status() {
    let app = test_app();

    let (_, created) = request(
        &app.router,
        "POST",
        "/api/v1/jobs",
        Some(json!({"topic": "whales", "slide_count": 2})),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = request(&app.router, "GET", &format!("/api/v1/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["steps_completed"].as_array().unwrap().len(), 0);
    assert_eq!(body["steps_remaining"].as_array().unwrap().len(), 4);
    assert_eq!(body["cancel_requested"], false);
}

#[tokio::test]
async fn test_result_unavailable_until_completed() {
    let app = test_app();

    let (_, created) = request(
        &app.router,
        "POST",
        "/api/v1/jobs",
        Some(json!({"topic": "whales", "slide_count": 2})),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/v1/jobs/{}/result", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("pending"));

    let (status, _) = request(&app.router, "GET", "/api/v1/jobs/unknown/result", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_result_after_completion() {
    let app = test_app();

    let (_, created) = request(
        &app.router,
        "POST",
        "/api/v1/jobs",
        Some(json!({"topic": "rust async runtimes", "slide_count": 3})),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    // Drive the job to completion in-process.
    app.runner.advance(&id, "test-worker").await.unwrap();

    let (status, body) = request(&app.router, "GET", &format!("/api/v1/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress_percent"], 100);
    assert_eq!(body["steps_completed"].as_array().unwrap().len(), 4);

    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/v1/jobs/{}/result", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], id.as_str());
    assert!(body["artifact_uri"].as_str().unwrap().starts_with("mem://"));
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["deck"]["slides"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_cancel_job() {
    let app = test_app();

    let (_, created) = request(
        &app.router,
        "POST",
        "/api/v1/jobs",
        Some(json!({"topic": "whales", "slide_count": 2})),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let (status, body) =
        request(&app.router, "DELETE", &format!("/api/v1/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["cancel_requested"], true);

    let (status, _) = request(&app.router, "DELETE", "/api/v1/jobs/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_terminal_job_conflicts() {
    let app = test_app();

    let (_, created) = request(
        &app.router,
        "POST",
        "/api/v1/jobs",
        Some(json!({"topic": "whales", "slide_count": 2})),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    app.runner.advance(&id, "test-worker").await.unwrap();
    assert!(app.store.get(&id).unwrap().unwrap().status.is_terminal());

    let (status, _) = request(&app.router, "DELETE", &format!("/api/v1/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_list_jobs() {
    let app = test_app();

    for topic in ["whales", "bees", "glaciers"] {
        request(
            &app.router,
            "POST",
            "/api/v1/jobs",
            Some(json!({"topic": topic, "slide_count": 2})),
        )
        .await;
    }

    let (status, body) = request(&app.router, "GET", "/api/v1/jobs?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 2);
    assert_eq!(body["total"], 3);
    assert_eq!(body["limit"], 2);

    let (status, body) = request(
        &app.router,
        "GET",
        "/api/v1/jobs?status=completed",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_health() {
    let app = test_app();

    let (status, body) = request(&app.router, "GET", "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let app = test_app();

    let (status, body) = request(&app.router, "GET", "/api/v1/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text_model"]["api_key_configured"], true);
    assert!(!serde_json::to_string(&body).unwrap().contains("test-key"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = test_app();

    let (status, body) = request(&app.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("slidesmith_jobs_by_status"));
}
