//! In-process tests of the HTTP API with a stub fetcher and provider.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use lkm_core::{PostContent, Settings};
use lkm_gateway::providers::{Provider, ProviderError};
use lkm_gateway::server::create_router;
use lkm_gateway::state::AppState;
use lkm_gateway::{PostFetcher, TaskPriority};
use lkm_knowledge::KnowledgeResult;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const URL: &str = "https://www.linkedin.com/posts/jane-doe_rag-activity-1";
const OTHER_URL: &str = "https://www.linkedin.com/feed/update/urn:li:activity:7123456789012345678";

struct SlowFetcher(Duration);

#[async_trait::async_trait]
impl PostFetcher for SlowFetcher {
    async fn fetch_post(&self, url: &str) -> KnowledgeResult<PostContent> {
        tokio::time::sleep(self.0).await;
        Ok(PostContent {
            url: url.to_string(),
            title: "RAG in production".to_string(),
            body_text: "Here's how we cut retrieval latency in half with hybrid search.".to_string(),
            author: "Jane Doe".to_string(),
            post_date: None,
            images: vec![],
            engagement_metrics: Default::default(),
        })
    }
}

struct Extractor;

#[async_trait::async_trait]
impl Provider for Extractor {
    fn name(&self) -> &str {
        "extractor"
    }

    fn model(&self) -> &str {
        "extractor-1"
    }

    async fn generate_content(&self, _prompt: &str) -> Result<String, ProviderError> {
        Ok("KNOWLEDGE: Hybrid search combines BM25 with dense embeddings to halve retrieval latency.\n\
            TOPIC: Machine Learning\n\
            COURSES: None\n\
            SUMMARY: Combine lexical and dense retrieval."
            .to_string())
    }
}

struct TestApp {
    _dir: TempDir,
    state: Arc<AppState>,
    router: Router,
}

async fn app_with(configure: impl FnOnce(&mut Settings), fetch_delay: Duration) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.storage.knowledge_repo_path = dir.path().join("knowledge");
    settings.storage.cache_db_path = dir.path().join("cache.db");
    configure(&mut settings);

    let state = AppState::build(settings, Arc::new(SlowFetcher(fetch_delay)), Arc::new(Extractor))
        .await
        .unwrap();
    let router = create_router(Arc::clone(&state));
    TestApp {
        _dir: dir,
        state,
        router,
    }
}

async fn app() -> TestApp {
    app_with(|_| {}, Duration::ZERO).await
}

async fn send(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, json)
}

/// Error envelope in a fixed field order for snapshots.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    error: bool,
    message: String,
    status_code: u16,
    error_code: String,
    path: String,
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, headers, body) = send(&app, Method::GET, "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "LinkedIn Knowledge Management System");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(headers["x-request-id"].len(), 8);
    assert!(headers.contains_key("x-process-time"));
}

#[tokio::test]
async fn test_invalid_url_envelope() {
    let app = app().await;
    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/urls/add",
        Some(json!({ "url": "https://example.com/not-linkedin" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let envelope: Envelope = serde_json::from_value(body).unwrap();
    insta::assert_json_snapshot!(envelope, @r###"
    {
      "error": true,
      "message": "Invalid LinkedIn URL: https://example.com/not-linkedin",
      "status_code": 400,
      "error_code": "INVALID_URL",
      "path": "/api/v1/urls/add"
    }
    "###);
}

#[tokio::test]
async fn test_add_url_then_duplicate() {
    let app = app().await;
    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/urls/add",
        Some(json!({ "url": URL, "priority": 8 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "URL added to processing queue");
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert!(task_id.starts_with("task_"));

    let task = app.state.batch.get_task(&task_id).unwrap();
    assert_eq!(task.priority, TaskPriority::Urgent);

    let (status, _, body) = send(&app, Method::POST, "/api/v1/urls/add", Some(json!({ "url": URL }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "ALREADY_CACHED");

    let (status, _, body) = send(&app, Method::GET, &format!("/api/v1/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["priority"], 8);
}

#[tokio::test]
async fn test_batch_reports_invalid_urls() {
    let app = app().await;
    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/urls/batch",
        Some(json!({ "urls": [URL, OTHER_URL, "https://www.linkedin.com/in/someone"] })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Added 2 URLs to processing queue");
    assert_eq!(body["valid_urls"], 2);
    assert_eq!(body["invalid_urls"], 1);
    assert_eq!(body["invalid_url_list"][0]["url"], "https://www.linkedin.com/in/someone");
    assert_eq!(body["task_ids"].as_array().unwrap().len(), 2);

    let (_, _, status) = send(&app, Method::GET, "/api/v1/queue/status", None).await;
    assert_eq!(status["queued_tasks"], 2);
    assert_eq!(status["status_distribution"]["queued"], 2);
}

#[tokio::test]
async fn test_missing_task_and_malformed_body() {
    let app = app().await;
    let (status, _, body) = send(&app, Method::GET, "/api/v1/tasks/task_0_0", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "NOT_FOUND");
    assert_eq!(body["path"], "/api/v1/tasks/task_0_0");

    let (status, _, body) = send(&app, Method::POST, "/api/v1/urls/add", Some(json!({ "link": URL }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_cancel_and_clear_tasks() {
    let app = app().await;
    let (_, _, added) = send(&app, Method::POST, "/api/v1/urls/add", Some(json!({ "url": URL }))).await;
    let task_id = added["task_id"].as_str().unwrap().to_string();

    let (status, _, body) = send(&app, Method::DELETE, &format!("/api/v1/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Task cancelled");

    let (status, _, body) = send(&app, Method::DELETE, &format!("/api/v1/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("cancelled"));

    let (status, _, body) = send(&app, Method::DELETE, "/api/v1/tasks/completed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);
}

#[tokio::test]
async fn test_start_processing_validation_and_conflict() {
    let app = app_with(|_| {}, Duration::from_millis(500)).await;
    send(&app, Method::POST, "/api/v1/urls/add", Some(json!({ "url": URL }))).await;

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/process/start",
        Some(json!({ "max_concurrent": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "BAD_REQUEST");

    let (status, _, body) = send(&app, Method::POST, "/api/v1/process/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_concurrent"], 5);

    let (status, _, body) = send(&app, Method::POST, "/api/v1/process/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "ALREADY_PROCESSING");

    let (_, _, body) = send(&app, Method::GET, "/api/v1/process/status", None).await;
    assert_eq!(body["is_processing"], true);

    let (status, _, _) = send(&app, Method::POST, "/api/v1/process/stop", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_processed_knowledge_is_served() {
    let app = app().await;
    app.state
        .batch
        .add_url(URL, TaskPriority::Normal, Value::Null)
        .await
        .unwrap();
    let report = app.state.batch.process_queue(2, None).await.unwrap();
    assert_eq!(report.stats.completed_tasks, 1);

    let (status, _, list) = send(&app, Method::GET, "/api/v1/knowledge?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["limit"], 5);
    let id = list["items"][0]["id"].as_str().unwrap().to_string();

    let (status, _, item) = send(&app, Method::GET, &format!("/api/v1/knowledge/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["category"], "AI & Machine Learning");

    let (_, _, filtered) = send(
        &app,
        Method::GET,
        "/api/v1/knowledge?category=SaaS%20%26%20Business",
        None,
    )
    .await;
    assert_eq!(filtered["total"], 0);

    let (status, _, search) = send(&app, Method::GET, "/api/v1/knowledge/search?query=hybrid", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(search["total_results"], 1);
    assert_eq!(search["results"][0]["knowledge_id"], id.as_str());

    let (status, _, related) = send(&app, Method::GET, &format!("/api/v1/knowledge/{id}/related"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(related["knowledge_id"], id.as_str());

    let (status, _, stats) = send(&app, Method::GET, "/api/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["batch"]["completed_tasks"], 1);
    assert_eq!(stats["pipeline"]["successful"], 1);
    assert!(stats["rate_limits"].is_null());
    let counters = &stats["metrics"]["application"];
    assert_eq!(counters["knowledge_items_processed"], 1);
    assert_eq!(counters["requests_by_endpoint"]["GET:/api/v1/knowledge/{id}/related"], 1);
    assert!(stats["active_alerts"].is_array());

    let (status, _, activity) = send(&app, Method::GET, "/api/v1/analytics/activity", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activity["pipeline"]["total_processed"], 1);

    let (status, _, _) = send(&app, Method::GET, "/api/v1/analytics/content", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, export) = send(&app, Method::GET, "/api/v1/export/csv", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(export["format"], "csv");
    assert_eq!(export["items"], 1);
    assert!(std::path::Path::new(export["file_path"].as_str().unwrap()).exists());
}

#[tokio::test]
async fn test_unknown_category_and_export_format() {
    let app = app().await;
    let (status, _, body) = send(&app, Method::GET, "/api/v1/knowledge?category=Cooking", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Unknown category: Cooking");

    let (status, _, _) = send(&app, Method::GET, "/api/v1/export/xlsx", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, Method::GET, "/api/v1/knowledge/missing-id", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let app = app_with(|s| s.server.api_rate_limit_per_minute = 1, Duration::ZERO).await;

    for _ in 0..2 {
        let (status, _, _) = send(&app, Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, body) = send(&app, Method::GET, "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error_code"], "RATE_LIMITED");
    assert_eq!(body["path"], "/api/v1/health");
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_metrics_and_detailed_health() {
    let app = app().await;
    send(&app, Method::GET, "/api/v1/health", None).await;
    send(&app, Method::GET, "/api/v1/tasks/task_missing", None).await;
    send(&app, Method::GET, "/api/v1/tasks/task_other", None).await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/api/v1/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("http_requests_total 3\n"), "{text}");
    assert!(text.contains("http_requests_failed 2\n"), "{text}");

    // Two of four requests failed, well past the critical error rate.
    let (status, _, health) = send(&app, Method::GET, "/api/v1/health/detailed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["overall_status"], "critical");
    assert_eq!(
        health["application_metrics"]["errors_by_endpoint"]["GET:/api/v1/tasks/{id}"],
        2
    );
    let alert_ids: Vec<&str> = health["active_alerts"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|a| a["id"].as_str())
        .collect();
    assert!(alert_ids.contains(&"error_rate_alert"), "{alert_ids:?}");

    let (status, _, alerts) = send(&app, Method::GET, "/api/v1/alerts?hours=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alerts["hours"], 1);
    assert!(!alerts["history"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_metrics_collection_can_be_disabled() {
    let app = app_with(|s| s.monitoring.enable_metrics_collection = false, Duration::ZERO).await;
    send(&app, Method::GET, "/api/v1/health", None).await;

    let (status, _, stats) = send(&app, Method::GET, "/api/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["metrics"]["enabled"], false);
    assert_eq!(stats["metrics"]["application"]["total_requests"], 0);
    assert!(stats["metrics"]["system"].is_null());
}
