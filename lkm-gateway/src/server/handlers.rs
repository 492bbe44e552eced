use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use lkm_core::{Category, KnowledgeItem, url_parser};
use lkm_db::{
    CacheMaintenance, CacheStatistics, ContentAnalytics, EnhancedCache, KnowledgeCacheRepository,
    RelatedItem, SearchHit,
};
use lkm_knowledge::ExportFormat;
use lkm_knowledge::pii::SanitizationStats;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use super::error::{ApiError, ApiResult};
use crate::batch::{
    BatchStatsReport, ProcessingTask, ProgressUpdate, QueueStatus, TaskPriority,
};
use crate::metrics::MetricsSnapshot;
use crate::monitoring::{Alert, SystemHealth};
use crate::pipeline::PipelineStats;
use crate::providers::RateLimitStatus;
use crate::retry::ErrorStatistics;
use crate::state::AppState;

pub const SERVICE_NAME: &str = "LinkedIn Knowledge Management System";
const DEFAULT_MAX_CONCURRENT: usize = 5;
const MAX_CONCURRENT: usize = 20;
const MAX_PAGE_SIZE: i64 = 100;

type AppStateRef = State<Arc<AppState>>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
pub struct AddUrlRequest {
    pub url: String,
    pub priority: Option<i64>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct AddUrlResponse {
    pub success: bool,
    pub message: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
}

pub async fn add_url(
    State(state): AppStateRef,
    payload: Result<Json<AddUrlRequest>, JsonRejection>,
) -> ApiResult<Json<AddUrlResponse>> {
    let Json(request) = payload?;
    if !url_parser::is_valid_linkedin_url(&request.url) {
        return Err(ApiError::InvalidUrl(request.url));
    }

    let priority = request
        .priority
        .map_or(TaskPriority::Normal, TaskPriority::from_level);
    let metadata = request
        .metadata
        .unwrap_or_else(|| Value::Object(Default::default()));

    match state.batch.add_url(&request.url, priority, metadata).await? {
        Some(task_id) => Ok(Json(AddUrlResponse {
            success: true,
            message: "URL added to processing queue".to_string(),
            task_id,
            timestamp: Utc::now(),
        })),
        None => Err(ApiError::AlreadyCached(request.url)),
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchUrlsRequest {
    pub urls: Vec<String>,
    pub priority: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct BatchUrlsResponse {
    pub success: bool,
    pub message: String,
    pub task_ids: Vec<String>,
    pub valid_urls: usize,
    pub invalid_urls: usize,
    pub invalid_url_list: Vec<url_parser::InvalidUrl>,
    pub timestamp: DateTime<Utc>,
}

pub async fn add_urls(
    State(state): AppStateRef,
    payload: Result<Json<BatchUrlsRequest>, JsonRejection>,
) -> ApiResult<Json<BatchUrlsResponse>> {
    let Json(request) = payload?;
    if request.urls.is_empty() {
        return Err(ApiError::BadRequest("No URLs provided".to_string()));
    }

    let priority = request
        .priority
        .map_or(TaskPriority::Normal, TaskPriority::from_level);
    let (valid, invalid) = url_parser::validate_batch_urls(&request.urls);
    let urls: Vec<String> = valid.iter().map(|info| info.normalized_url.clone()).collect();
    let task_ids = state.batch.add_urls(&urls, priority).await;

    info!(
        queued = task_ids.len(),
        valid = valid.len(),
        invalid = invalid.len(),
        "Batch of URLs submitted"
    );
    Ok(Json(BatchUrlsResponse {
        success: true,
        message: format!("Added {} URLs to processing queue", task_ids.len()),
        task_ids,
        valid_urls: valid.len(),
        invalid_urls: invalid.len(),
        invalid_url_list: invalid,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartProcessingRequest {
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProcessingControlResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Start working through the queue in the background. The body is optional.
pub async fn start_processing(
    State(state): AppStateRef,
    body: Bytes,
) -> ApiResult<Json<ProcessingControlResponse>> {
    let request: StartProcessingRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartProcessingRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let max_concurrent = request.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT);
    if !(1..=MAX_CONCURRENT).contains(&max_concurrent) {
        return Err(ApiError::BadRequest(format!(
            "max_concurrent must be between 1 and {MAX_CONCURRENT}"
        )));
    }

    let handle = state.batch.spawn_processing(max_concurrent, None)?;
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(report)) => info!(
                completed = report.stats.completed_tasks,
                failed = report.stats.failed_tasks,
                "Background processing finished"
            ),
            Ok(Err(e)) => error!(error = %e, "Background processing failed"),
            Err(e) => error!(error = %e, "Background processing task aborted"),
        }
    });

    Ok(Json(ProcessingControlResponse {
        success: true,
        message: "Processing started".to_string(),
        max_concurrent: Some(max_concurrent),
        timestamp: Utc::now(),
    }))
}

pub async fn stop_processing(State(state): AppStateRef) -> Json<ProcessingControlResponse> {
    state.batch.stop_processing();
    Json(ProcessingControlResponse {
        success: true,
        message: "Processing stop requested".to_string(),
        max_concurrent: None,
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Serialize)]
pub struct ProcessingStatusResponse {
    pub is_processing: bool,
    pub progress: ProgressUpdate,
    pub stats: BatchStatsReport,
    pub pipeline: PipelineStats,
    pub timestamp: DateTime<Utc>,
}

pub async fn processing_status(State(state): AppStateRef) -> Json<ProcessingStatusResponse> {
    Json(ProcessingStatusResponse {
        is_processing: state.batch.is_processing(),
        progress: state.batch.progress(),
        stats: state.batch.stats(),
        pipeline: state.pipeline.stats(),
        timestamp: Utc::now(),
    })
}

pub async fn queue_status(State(state): AppStateRef) -> Json<QueueStatus> {
    Json(state.batch.get_queue_status())
}

pub async fn get_task(
    State(state): AppStateRef,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ProcessingTask>> {
    state
        .batch
        .get_task(&task_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Task not found: {task_id}")))
}

#[derive(Debug, Serialize)]
pub struct TaskActionResponse {
    pub success: bool,
    pub message: String,
    pub task_id: String,
}

pub async fn cancel_task(
    State(state): AppStateRef,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskActionResponse>> {
    if state.batch.cancel_task(&task_id).await? {
        return Ok(Json(TaskActionResponse {
            success: true,
            message: "Task cancelled".to_string(),
            task_id,
        }));
    }
    match state.batch.get_task(&task_id) {
        Some(task) => Err(ApiError::BadRequest(format!(
            "Task cannot be cancelled in status {}",
            task.status
        ))),
        None => Err(ApiError::NotFound(format!("Task not found: {task_id}"))),
    }
}

#[derive(Debug, Serialize)]
pub struct ClearTasksResponse {
    pub success: bool,
    pub message: String,
    pub removed: usize,
}

pub async fn clear_completed_tasks(State(state): AppStateRef) -> ApiResult<Json<ClearTasksResponse>> {
    let removed = state.batch.clear_completed_tasks().await?;
    Ok(Json(ClearTasksResponse {
        success: true,
        message: format!("Cleared {removed} completed tasks"),
        removed,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListKnowledgeQuery {
    #[serde(default = "default_page_size")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub category: Option<String>,
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct KnowledgeListResponse {
    pub items: Vec<KnowledgeItem>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_knowledge(
    State(state): AppStateRef,
    query: Result<Query<ListKnowledgeQuery>, QueryRejection>,
) -> ApiResult<Json<KnowledgeListResponse>> {
    let Query(query) = query?;
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.max(0);
    let category = parse_category(query.category.as_deref())?;

    let items = KnowledgeCacheRepository::list(state.cache.pool(), category, limit, offset).await?;
    let total = KnowledgeCacheRepository::count(state.cache.pool(), category).await?;
    Ok(Json(KnowledgeListResponse {
        items,
        total,
        limit,
        offset,
    }))
}

pub async fn get_knowledge(
    State(state): AppStateRef,
    Path(id): Path<String>,
) -> ApiResult<Json<KnowledgeItem>> {
    if let Some(item) = KnowledgeCacheRepository::get_by_id(state.cache.pool(), &id).await? {
        return Ok(Json(item));
    }
    state
        .pipeline
        .repository_snapshot()
        .await
        .get_item(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Knowledge item not found: {id}")))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub category: Option<String>,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

fn default_search_limit() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_results: usize,
    pub query: String,
    pub category: Option<Category>,
}

pub async fn search_knowledge(
    State(state): AppStateRef,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<Json<SearchResponse>> {
    let Query(query) = query?;
    let text = query.query.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("Search query must not be empty".to_string()));
    }
    let category = parse_category(query.category.as_deref())?;

    let results = EnhancedCache::search_knowledge(
        state.cache.pool(),
        text,
        category,
        query.limit.clamp(1, MAX_PAGE_SIZE),
    )
    .await?;
    Ok(Json(SearchResponse {
        total_results: results.len(),
        results,
        query: text.to_string(),
        category,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RelatedQuery {
    #[serde(default = "default_related_limit")]
    pub limit: i64,
}

fn default_related_limit() -> i64 {
    5
}

#[derive(Debug, Serialize)]
pub struct RelatedResponse {
    pub knowledge_id: String,
    pub related: Vec<RelatedItem>,
    pub total: usize,
}

pub async fn related_knowledge(
    State(state): AppStateRef,
    Path(id): Path<String>,
    query: Result<Query<RelatedQuery>, QueryRejection>,
) -> ApiResult<Json<RelatedResponse>> {
    let Query(query) = query?;
    if KnowledgeCacheRepository::get_by_id(state.cache.pool(), &id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!("Knowledge item not found: {id}")));
    }

    let related =
        EnhancedCache::get_related_content(state.cache.pool(), &id, query.limit.clamp(1, 50))
            .await?;
    Ok(Json(RelatedResponse {
        knowledge_id: id,
        total: related.len(),
        related,
    }))
}

pub async fn content_analytics(State(state): AppStateRef) -> ApiResult<Json<ContentAnalytics>> {
    Ok(Json(
        EnhancedCache::get_content_analytics(state.cache.pool()).await?,
    ))
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    /// Repository items per extraction day, last 30 days
    pub repository_activity: std::collections::BTreeMap<String, i64>,
    /// Cached items per day, last 7 days
    pub cache_activity: std::collections::BTreeMap<String, i64>,
    pub pipeline: PipelineStats,
    pub errors: ErrorStatistics,
    pub timestamp: DateTime<Utc>,
}

pub async fn activity_analytics(State(state): AppStateRef) -> ApiResult<Json<ActivityResponse>> {
    let repository = state.repositories.get_statistics().await?;
    let analytics = EnhancedCache::get_content_analytics(state.cache.pool()).await?;
    Ok(Json(ActivityResponse {
        repository_activity: repository.recent_activity,
        cache_activity: analytics.recent_activity,
        pipeline: state.pipeline.stats(),
        errors: state.pipeline.error_handler().statistics(),
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
pub struct SystemStatsResponse {
    pub cache: CacheStatistics,
    pub batch: BatchStatsReport,
    pub sanitizer: SanitizationStats,
    pub rate_limits: Option<RateLimitStatus>,
    pub pipeline: PipelineStats,
    pub metrics: MetricsSnapshot,
    pub active_alerts: Vec<Alert>,
    pub uptime_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

pub async fn system_stats(State(state): AppStateRef) -> ApiResult<Json<SystemStatsResponse>> {
    let now = Utc::now();
    Ok(Json(SystemStatsResponse {
        cache: CacheMaintenance::statistics(&state.cache).await?,
        batch: state.batch.stats(),
        sanitizer: state.sanitizer.statistics(),
        rate_limits: state.provider.rate_limit_status(),
        pipeline: state.pipeline.stats(),
        metrics: state.metrics.snapshot(),
        active_alerts: state.monitor.alerts().active_alerts(),
        uptime_seconds: (now - state.started_at).num_seconds(),
        timestamp: now,
    }))
}

/// Counters as plain `name value` lines.
pub async fn export_metrics(State(state): AppStateRef) -> String {
    state.metrics.export_metrics()
}

/// Run the health checks now and report the result.
pub async fn detailed_health(State(state): AppStateRef) -> Json<SystemHealth> {
    state.monitor.check();
    Json(state.monitor.health_status())
}

#[derive(Debug, Deserialize)]
pub struct AlertHistoryQuery {
    #[serde(default = "default_alert_hours")]
    pub hours: i64,
}

fn default_alert_hours() -> i64 {
    24
}

#[derive(Debug, Serialize)]
pub struct AlertHistoryResponse {
    pub active: Vec<Alert>,
    pub history: Vec<Alert>,
    pub hours: i64,
}

pub async fn alert_history(
    State(state): AppStateRef,
    query: Result<Query<AlertHistoryQuery>, QueryRejection>,
) -> ApiResult<Json<AlertHistoryResponse>> {
    let Query(query) = query?;
    let hours = query.hours.clamp(1, 24 * 30);
    Ok(Json(AlertHistoryResponse {
        active: state.monitor.alerts().active_alerts(),
        history: state.monitor.alerts().alert_history(hours),
        hours,
    }))
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub success: bool,
    pub format: ExportFormat,
    pub file_path: String,
    pub items: usize,
    pub timestamp: DateTime<Utc>,
}

pub async fn export_knowledge(
    State(state): AppStateRef,
    Path(format): Path<String>,
) -> ApiResult<Json<ExportResponse>> {
    let export_format: ExportFormat = format.parse().map_err(ApiError::NotFound)?;
    let repository = state.pipeline.repository_snapshot().await;
    let path = state.organizer.export(&repository, export_format)?;

    info!(path = %path.display(), items = repository.items.len(), "Knowledge exported");
    Ok(Json(ExportResponse {
        success: true,
        format: export_format,
        file_path: path.display().to_string(),
        items: repository.items.len(),
        timestamp: Utc::now(),
    }))
}

/// Exact, case-insensitive category name. Unknown names are rejected
/// rather than mapped to Other.
fn parse_category(value: Option<&str>) -> ApiResult<Option<Category>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    Category::ALL
        .into_iter()
        .find(|category| category.as_str().eq_ignore_ascii_case(value))
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown category: {value}")))
}
