//! Priority queue of URL tasks with bounded concurrent processing.
//!
//! Tasks live in memory and are mirrored to `processing_queue.json` after
//! every change, so a restarted server picks up where it stopped. Running
//! statistics go to `batch_stats.json` when a run ends.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lkm_core::url_parser;
use lkm_db::{CacheDbPool, ProcessingStatus, UrlCacheRepository};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{Id as WorkerId, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::errors::{ProcessingError, ProcessingResult};
use crate::metrics::MetricsCollector;
use crate::retry::{Classify, ErrorKind};

pub const QUEUE_FILE: &str = "processing_queue.json";
pub const STATS_FILE: &str = "batch_stats.json";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const MAX_CONCURRENCY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Retrying,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Retrying => "retrying",
        }
    }

    fn is_pending(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Retrying)
    }

    fn is_finished(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized as its numeric level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskPriority {
    Low = 1,
    Normal = 3,
    High = 5,
    Urgent = 8,
    Critical = 10,
}

impl TaskPriority {
    /// Round an arbitrary level down to the nearest named priority.
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=2 => TaskPriority::Low,
            3..=4 => TaskPriority::Normal,
            5..=7 => TaskPriority::High,
            8..=9 => TaskPriority::Urgent,
            _ => TaskPriority::Critical,
        }
    }
}

impl From<TaskPriority> for u8 {
    fn from(priority: TaskPriority) -> Self {
        priority as u8
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TaskPriority::Low),
            3 => Ok(TaskPriority::Normal),
            5 => Ok(TaskPriority::High),
            8 => Ok(TaskPriority::Urgent),
            10 => Ok(TaskPriority::Critical),
            other => Err(format!("unknown task priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: String,
    pub url: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<Value>,
    #[serde(default)]
    pub metadata: Value,
}

impl ProcessingTask {
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    /// Seconds between start and completion, once both are known.
    pub fn processing_time(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.completed_at?);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    pub retried_tasks: u64,
    pub duplicates_skipped: u64,
    pub average_processing_time: f64,
    pub total_processing_time: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl BatchStats {
    /// Completed share of finished tasks, in percent.
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed_tasks + self.failed_tasks;
        if finished == 0 {
            0.0
        } else {
            self.completed_tasks as f64 / finished as f64 * 100.0
        }
    }

    /// Seconds between the start and the end of the last run.
    pub fn total_duration(&self) -> Option<f64> {
        let (start, end) = (self.start_time?, self.end_time?);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }

    pub fn report(&self) -> BatchStatsReport {
        BatchStatsReport {
            stats: self.clone(),
            success_rate: self.success_rate(),
            total_duration: self.total_duration(),
        }
    }

    fn record_completion(&mut self, seconds: Option<f64>) {
        self.completed_tasks += 1;
        if let Some(seconds) = seconds {
            self.total_processing_time += seconds;
            self.average_processing_time =
                self.total_processing_time / self.completed_tasks as f64;
        }
    }
}

/// [`BatchStats`] plus the derived figures.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatsReport {
    #[serde(flatten)]
    pub stats: BatchStats,
    pub success_rate: f64,
    pub total_duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub active_tasks: usize,
    pub queue_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub total_tasks: usize,
    pub queued_tasks: usize,
    pub status_distribution: BTreeMap<String, usize>,
    pub is_processing: bool,
    pub stats: BatchStatsReport,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Work done for one task. The returned JSON is stored as the task result.
#[async_trait::async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &ProcessingTask) -> ProcessingResult<Value>;
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: BTreeMap<String, ProcessingTask>,
    queue: VecDeque<String>,
    stats: BatchStats,
    next_seq: u64,
}

impl QueueState {
    /// Insert before the first queued task with a lower priority.
    fn enqueue(&mut self, id: String, priority: TaskPriority) {
        let position = self.queue.iter().position(|queued| {
            self.tasks
                .get(queued)
                .is_some_and(|task| task.priority < priority)
        });
        match position {
            Some(index) => self.queue.insert(index, id),
            None => self.queue.push_back(id),
        }
    }

    fn progress(&self) -> ProgressUpdate {
        let count = |status: TaskStatus| self.tasks.values().filter(|t| t.status == status).count();
        ProgressUpdate {
            total_tasks: self.tasks.len(),
            completed_tasks: count(TaskStatus::Completed),
            failed_tasks: count(TaskStatus::Failed),
            active_tasks: count(TaskStatus::Processing),
            queue_size: self.queue.len(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueSnapshot {
    tasks: BTreeMap<String, ProcessingTask>,
    task_queue: Vec<String>,
    stats: BatchStats,
    saved_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ResultsExport<'a> {
    export_time: DateTime<Utc>,
    stats: BatchStatsReport,
    tasks: Vec<&'a ProcessingTask>,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BatchProcessor {
    cache: CacheDbPool,
    executor: Arc<dyn TaskExecutor>,
    state: Mutex<QueueState>,
    is_processing: AtomicBool,
    stop_requested: AtomicBool,
    /// Held across a queue file write so snapshots land one at a time.
    save_lock: tokio::sync::Mutex<()>,
    queue_file: PathBuf,
    stats_file: PathBuf,
    metrics: Option<Arc<MetricsCollector>>,
}

impl BatchProcessor {
    /// Open the processor, restoring any queue saved under `data_dir`.
    ///
    /// Tasks that were mid-flight when the queue was saved go back to the
    /// queue.
    pub async fn open(
        cache: CacheDbPool,
        executor: Arc<dyn TaskExecutor>,
        data_dir: &Path,
    ) -> ProcessingResult<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let queue_file = data_dir.join(QUEUE_FILE);
        let mut state = QueueState::default();

        if tokio::fs::try_exists(&queue_file).await? {
            let raw = tokio::fs::read_to_string(&queue_file).await?;
            match serde_json::from_str::<QueueSnapshot>(&raw) {
                Ok(snapshot) => {
                    state.tasks = snapshot.tasks;
                    state.stats = snapshot.stats;
                    state.queue = snapshot.task_queue.into();
                    let interrupted: Vec<(String, TaskPriority)> = state
                        .tasks
                        .values_mut()
                        .filter(|t| t.status == TaskStatus::Processing)
                        .map(|t| {
                            t.status = TaskStatus::Queued;
                            t.started_at = None;
                            (t.id.clone(), t.priority)
                        })
                        .collect();
                    for (id, priority) in interrupted {
                        if !state.queue.contains(&id) {
                            state.enqueue(id, priority);
                        }
                    }
                    state.next_seq = state.tasks.len() as u64;
                    info!(tasks = state.tasks.len(), queued = state.queue.len(), "Restored processing queue");
                }
                Err(e) => warn!(path = %queue_file.display(), error = %e, "Ignoring unreadable queue file"),
            }
        }

        Ok(Self {
            cache,
            executor,
            state: Mutex::new(state),
            is_processing: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            save_lock: tokio::sync::Mutex::new(()),
            queue_file,
            stats_file: data_dir.join(STATS_FILE),
            metrics: None,
        })
    }

    /// Report the queue length to `metrics` whenever the queue is saved.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        metrics.update_queue_size(self.lock().queue.len());
        self.metrics = Some(metrics);
        self
    }

    /// Queue a URL. Returns `None` when it was skipped as a duplicate.
    pub async fn add_url(
        &self,
        url: &str,
        priority: TaskPriority,
        metadata: Value,
    ) -> ProcessingResult<Option<String>> {
        let info =
            url_parser::parse_url(url).map_err(|_| ProcessingError::InvalidUrl(url.to_string()))?;

        let already_done = UrlCacheRepository::get(&self.cache, url)
            .await?
            .is_some_and(|cached| cached.processing_status == ProcessingStatus::Completed);

        let id = {
            let mut state = self.lock();
            let in_flight = state.tasks.values().any(|t| {
                !t.status.is_finished()
                    && url_parser::clean_url(&t.url).is_ok_and(|u| u == info.normalized_url)
            });
            if already_done || in_flight {
                state.stats.duplicates_skipped += 1;
                debug!(url, "Skipping duplicate URL");
                return Ok(None);
            }

            state.next_seq += 1;
            let id = format!("task_{}_{}", Utc::now().timestamp_millis(), state.next_seq);
            let mut metadata = metadata;
            if let Value::Object(map) = &mut metadata {
                map.entry("post_type")
                    .or_insert_with(|| Value::String(info.post_type.to_string()));
            }
            state.tasks.insert(
                id.clone(),
                ProcessingTask {
                    id: id.clone(),
                    url: url.to_string(),
                    priority,
                    status: TaskStatus::Queued,
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                    error_message: None,
                    retry_count: 0,
                    max_retries: DEFAULT_MAX_RETRIES,
                    result: None,
                    metadata,
                },
            );
            state.enqueue(id.clone(), priority);
            state.stats.total_tasks += 1;
            id
        };

        info!(task_id = %id, url, ?priority, "Task queued");
        self.save_queue().await?;
        Ok(Some(id))
    }

    /// Queue several URLs. Invalid URLs and duplicates are skipped.
    pub async fn add_urls(&self, urls: &[String], priority: TaskPriority) -> Vec<String> {
        let mut ids = Vec::new();
        for url in urls {
            match self.add_url(url, priority, Value::Object(Default::default())).await {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => {}
                Err(e) => warn!(url = %url, error = %e, "Could not queue URL"),
            }
        }
        ids
    }

    /// Work through the queue with at most `max_concurrent` tasks in flight.
    ///
    /// Returns when the queue is empty or a stop was requested and the
    /// running tasks have finished.
    pub async fn process_queue(
        self: &Arc<Self>,
        max_concurrent: usize,
        progress: Option<ProgressCallback>,
    ) -> ProcessingResult<BatchStatsReport> {
        self.begin_run()?;
        self.run_queue(max_concurrent, progress).await
    }

    /// Like [`process_queue`](Self::process_queue), on a background task.
    /// The running flag is set before this returns.
    pub fn spawn_processing(
        self: &Arc<Self>,
        max_concurrent: usize,
        progress: Option<ProgressCallback>,
    ) -> ProcessingResult<JoinHandle<ProcessingResult<BatchStatsReport>>> {
        self.begin_run()?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.run_queue(max_concurrent, progress).await
        }))
    }

    fn begin_run(&self) -> ProcessingResult<()> {
        if self.is_processing.swap(true, Ordering::SeqCst) {
            return Err(ProcessingError::AlreadyProcessing);
        }
        Ok(())
    }

    async fn run_queue(
        self: &Arc<Self>,
        max_concurrent: usize,
        progress: Option<ProgressCallback>,
    ) -> ProcessingResult<BatchStatsReport> {
        let _running = RunningFlag(&self.is_processing);
        self.stop_requested.store(false, Ordering::SeqCst);

        let limit = max_concurrent.clamp(1, MAX_CONCURRENCY);
        {
            let mut state = self.lock();
            state.stats.start_time = Some(Utc::now());
            state.stats.end_time = None;
            info!(queued = state.queue.len(), max_concurrent = limit, "Batch processing started");
        }

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut running = JoinSet::new();
        let mut workers: HashMap<WorkerId, String> = HashMap::new();

        loop {
            while !self.stop_requested.load(Ordering::SeqCst) && running.len() < limit {
                let Some(task) = self.claim_next() else {
                    break;
                };
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let task_id = task.id.clone();
                let this = Arc::clone(self);
                let handle = running.spawn(async move {
                    let _permit = permit;
                    this.run_task(task).await;
                });
                workers.insert(handle.id(), task_id);
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((worker, ())) => {
                    workers.remove(&worker);
                }
                Err(e) => {
                    error!(error = %e, "Task worker panicked");
                    if let Some(task_id) = workers.remove(&e.id()) {
                        self.abandon_task(&task_id, &e.to_string());
                        if let Err(e) = self.save_queue().await {
                            warn!(error = %e, "Failed to persist processing queue");
                        }
                    }
                }
            }
            if let Some(callback) = &progress {
                let update = self.lock().progress();
                callback(update);
            }
        }

        let report = {
            let mut state = self.lock();
            state.stats.end_time = Some(Utc::now());
            state.stats.report()
        };
        if self.stop_requested.load(Ordering::SeqCst) {
            info!("Batch processing stopped on request");
        }
        info!(
            completed = report.stats.completed_tasks,
            failed = report.stats.failed_tasks,
            success_rate = report.success_rate,
            "Batch processing finished"
        );

        self.save_queue().await?;
        self.save_stats().await?;
        Ok(report)
    }

    pub fn stop_processing(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        info!("Processing stop requested");
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> ProgressUpdate {
        self.lock().progress()
    }

    pub fn get_task(&self, id: &str) -> Option<ProcessingTask> {
        self.lock().tasks.get(id).cloned()
    }

    /// Ids waiting to run, in execution order.
    pub fn queued_task_ids(&self) -> Vec<String> {
        self.lock().queue.iter().cloned().collect()
    }

    pub fn stats(&self) -> BatchStatsReport {
        self.lock().stats.report()
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        let state = self.lock();
        let status_distribution = TaskStatus::ALL
            .iter()
            .map(|status| {
                let count = state.tasks.values().filter(|t| t.status == *status).count();
                (status.to_string(), count)
            })
            .collect();

        QueueStatus {
            total_tasks: state.tasks.len(),
            queued_tasks: state.queue.len(),
            status_distribution,
            is_processing: self.is_processing(),
            stats: state.stats.report(),
        }
    }

    /// Cancel a task that has not started. Returns `false` otherwise.
    pub async fn cancel_task(&self, id: &str) -> ProcessingResult<bool> {
        {
            let mut state = self.lock();
            let Some(task) = state.tasks.get_mut(id) else {
                return Ok(false);
            };
            if !task.status.is_pending() {
                return Ok(false);
            }
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            state.queue.retain(|queued| queued != id);
            state.stats.cancelled_tasks += 1;
        }
        info!(task_id = id, "Task cancelled");
        self.save_queue().await?;
        Ok(true)
    }

    /// Forget completed, failed and cancelled tasks. Returns how many went.
    pub async fn clear_completed_tasks(&self) -> ProcessingResult<usize> {
        let removed = {
            let mut state = self.lock();
            let before = state.tasks.len();
            state.tasks.retain(|_, task| !task.status.is_finished());
            before - state.tasks.len()
        };
        info!(removed, "Cleared finished tasks");
        self.save_queue().await?;
        Ok(removed)
    }

    /// Write finished tasks and the statistics to a JSON file.
    pub async fn export_results(&self, path: &Path, include_failed: bool) -> ProcessingResult<usize> {
        let (json, count) = {
            let state = self.lock();
            let tasks: Vec<&ProcessingTask> = state
                .tasks
                .values()
                .filter(|t| {
                    t.status == TaskStatus::Completed
                        || (include_failed && t.status == TaskStatus::Failed)
                })
                .collect();
            let count = tasks.len();
            let export = ResultsExport {
                export_time: Utc::now(),
                stats: state.stats.report(),
                tasks,
            };
            (serde_json::to_string_pretty(&export)?, count)
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), tasks = count, "Exported batch results");
        Ok(count)
    }

    fn claim_next(&self) -> Option<ProcessingTask> {
        let mut state = self.lock();
        while let Some(id) = state.queue.pop_front() {
            let Some(task) = state.tasks.get_mut(&id) else {
                continue;
            };
            if !task.status.is_pending() {
                continue;
            }
            task.status = TaskStatus::Processing;
            task.started_at = Some(Utc::now());
            return Some(task.clone());
        }
        None
    }

    async fn run_task(&self, task: ProcessingTask) {
        debug!(task_id = %task.id, url = %task.url, attempt = task.retry_count + 1, "Running task");
        let outcome = self.executor.execute(&task).await;
        self.finish_task(&task.id, outcome);
        if let Err(e) = self.save_queue().await {
            warn!(error = %e, "Failed to persist processing queue");
        }
    }

    fn finish_task(&self, id: &str, outcome: ProcessingResult<Value>) {
        let mut state = self.lock();
        let QueueState { tasks, stats, .. } = &mut *state;
        let Some(task) = tasks.get_mut(id) else {
            return;
        };

        let requeue = match outcome {
            Ok(result) => {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(Utc::now());
                task.error_message = None;
                task.result = Some(result);
                stats.record_completion(task.processing_time());
                info!(task_id = id, "Task completed");
                None
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error_message = Some(e.to_string());
                if task.can_retry() && e.error_kind() != ErrorKind::Validation {
                    task.retry_count += 1;
                    task.status = TaskStatus::Retrying;
                    task.started_at = None;
                    stats.retried_tasks += 1;
                    warn!(task_id = id, retry = task.retry_count, error = %e, "Task failed, retrying");
                    Some(task.priority)
                } else {
                    task.completed_at = Some(Utc::now());
                    stats.failed_tasks += 1;
                    error!(task_id = id, error = %e, "Task failed");
                    None
                }
            }
        };

        if let Some(priority) = requeue {
            state.enqueue(id.to_string(), priority);
        }
    }

    /// Fail a task whose worker died without reporting an outcome.
    fn abandon_task(&self, id: &str, reason: &str) {
        let mut state = self.lock();
        let QueueState { tasks, stats, .. } = &mut *state;
        let Some(task) = tasks.get_mut(id) else {
            return;
        };
        if task.status != TaskStatus::Processing {
            return;
        }
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        task.error_message = Some(format!("worker aborted: {reason}"));
        stats.failed_tasks += 1;
    }

    /// Snapshot the queue and replace the file through a rename, so readers
    /// never see a half-written file.
    async fn save_queue(&self) -> ProcessingResult<()> {
        let _guard = self.save_lock.lock().await;
        let json = {
            let state = self.lock();
            let snapshot = QueueSnapshot {
                tasks: state.tasks.clone(),
                task_queue: state.queue.iter().cloned().collect(),
                stats: state.stats.clone(),
                saved_at: Utc::now(),
            };
            if let Some(metrics) = &self.metrics {
                metrics.update_queue_size(state.queue.len());
            }
            serde_json::to_string_pretty(&snapshot)?
        };
        let staging = self.queue_file.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &self.queue_file).await?;
        Ok(())
    }

    async fn save_stats(&self) -> ProcessingResult<()> {
        let json = serde_json::to_string_pretty(&self.stats())?;
        tokio::fs::write(&self.stats_file, json).await?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use lkm_db::test_helpers::create_test_cache_pool;
    use tempfile::TempDir;

    /// Fails every URL containing "broken", panics on "crash", succeeds
    /// otherwise.
    struct Picky;

    #[async_trait::async_trait]
    impl TaskExecutor for Picky {
        async fn execute(&self, task: &ProcessingTask) -> ProcessingResult<Value> {
            if task.url.contains("crash") {
                panic!("executor blew up on {}", task.url);
            }
            if task.url.contains("broken") {
                return Err(ProcessingError::stage("scrape", Some(&task.url), "upstream 502"));
            }
            Ok(serde_json::json!({ "knowledge_item_id": format!("k-{}", task.id) }))
        }
    }

    const A: &str = "https://www.linkedin.com/posts/jane-doe_rag-activity-1";
    const B: &str = "https://www.linkedin.com/posts/john-roe_okr-activity-2";
    const C: &str = "https://www.linkedin.com/posts/ann-lee_seo-activity-3";
    const BROKEN: &str = "https://www.linkedin.com/posts/jane-doe_broken-activity-4";

    async fn processor(dir: &TempDir) -> Arc<BatchProcessor> {
        let cache = create_test_cache_pool().await.unwrap();
        Arc::new(
            BatchProcessor::open(cache, Arc::new(Picky), dir.path())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_queue_orders_by_priority() {
        let dir = TempDir::new().unwrap();
        let batch = processor(&dir).await;

        let low = batch.add_url(A, TaskPriority::Low, Value::Null).await.unwrap().unwrap();
        let normal = batch.add_url(B, TaskPriority::Normal, Value::Null).await.unwrap().unwrap();
        let critical = batch.add_url(C, TaskPriority::Critical, Value::Null).await.unwrap().unwrap();

        assert_eq!(batch.queued_task_ids(), vec![critical, normal, low]);
        assert!(dir.path().join(QUEUE_FILE).exists());
    }

    #[tokio::test]
    async fn test_add_url_rejects_invalid_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let batch = processor(&dir).await;

        let err = batch
            .add_url("https://example.com/post", TaskPriority::Normal, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidUrl(_)));

        assert!(batch.add_url(A, TaskPriority::Normal, Value::Null).await.unwrap().is_some());
        assert!(batch.add_url(A, TaskPriority::High, Value::Null).await.unwrap().is_none());

        let hash = UrlCacheRepository::cache_url(&batch.cache, B, None).await.unwrap();
        UrlCacheRepository::set_status(batch.cache.pool(), &hash, ProcessingStatus::Completed, None)
            .await
            .unwrap();
        assert!(batch.add_url(B, TaskPriority::Normal, Value::Null).await.unwrap().is_none());

        let stats = batch.stats();
        assert_eq!(stats.stats.total_tasks, 1);
        assert_eq!(stats.stats.duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn test_process_queue_retries_then_fails() {
        let dir = TempDir::new().unwrap();
        let batch = processor(&dir).await;
        let ids = batch
            .add_urls(&[A.to_string(), BROKEN.to_string(), "not a url".to_string()], TaskPriority::Normal)
            .await;
        assert_eq!(ids.len(), 2);

        let updates = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&updates);
        let report = batch
            .process_queue(2, Some(Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })))
            .await
            .unwrap();

        assert_eq!(report.stats.completed_tasks, 1);
        assert_eq!(report.stats.failed_tasks, 1);
        assert_eq!(report.stats.retried_tasks, 3);
        assert!((report.success_rate - 50.0).abs() < f64::EPSILON);
        assert!(report.total_duration.is_some());
        assert_eq!(updates.load(Ordering::SeqCst), 5);

        let broken = batch.get_task(&ids[1]).unwrap();
        assert_eq!(broken.status, TaskStatus::Failed);
        assert_eq!(broken.retry_count, 3);
        assert!(broken.error_message.unwrap().contains("upstream 502"));

        let done = batch.get_task(&ids[0]).unwrap();
        assert_eq!(done.result.unwrap()["knowledge_item_id"], format!("k-{}", ids[0]));
        assert!(!batch.is_processing());
        assert!(dir.path().join(STATS_FILE).exists());

        let status = batch.get_queue_status();
        assert_eq!(status.status_distribution["completed"], 1);
        assert_eq!(status.status_distribution["failed"], 1);
        assert_eq!(status.queued_tasks, 0);

        let export = dir.path().join("exports/results.json");
        assert_eq!(batch.export_results(&export, false).await.unwrap(), 1);
        assert_eq!(batch.export_results(&export, true).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejects_concurrent_runs() {
        let dir = TempDir::new().unwrap();
        let batch = processor(&dir).await;
        batch.is_processing.store(true, Ordering::SeqCst);

        let err = batch.process_queue(1, None).await.unwrap_err();
        assert!(matches!(err, ProcessingError::AlreadyProcessing));
        assert!(batch.is_processing());
    }

    #[tokio::test]
    async fn test_spawned_run_holds_flag_until_done() {
        let dir = TempDir::new().unwrap();
        let batch = processor(&dir).await;
        batch.add_url(A, TaskPriority::Normal, Value::Null).await.unwrap();

        let handle = batch.spawn_processing(2, None).unwrap();
        assert!(batch.is_processing());
        assert!(matches!(
            batch.spawn_processing(2, None),
            Err(ProcessingError::AlreadyProcessing)
        ));

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.stats.completed_tasks, 1);
        assert!(!batch.is_processing());
        assert_eq!(batch.progress().completed_tasks, 1);
    }

    #[tokio::test]
    async fn test_cancel_and_clear() {
        let dir = TempDir::new().unwrap();
        let batch = processor(&dir).await;
        let a = batch.add_url(A, TaskPriority::Normal, Value::Null).await.unwrap().unwrap();
        let b = batch.add_url(B, TaskPriority::Normal, Value::Null).await.unwrap().unwrap();

        assert!(batch.cancel_task(&a).await.unwrap());
        assert!(!batch.cancel_task(&a).await.unwrap());
        assert!(!batch.cancel_task("task_missing").await.unwrap());
        assert_eq!(batch.queued_task_ids(), vec![b.clone()]);

        batch.process_queue(3, None).await.unwrap();
        assert_eq!(batch.get_task(&b).unwrap().status, TaskStatus::Completed);
        assert_eq!(batch.stats().stats.cancelled_tasks, 1);

        assert_eq!(batch.clear_completed_tasks().await.unwrap(), 2);
        assert_eq!(batch.get_queue_status().total_tasks, 0);
    }

    #[tokio::test]
    async fn test_queue_length_reaches_metrics() {
        let dir = TempDir::new().unwrap();
        let cache = create_test_cache_pool().await.unwrap();
        let metrics = Arc::new(MetricsCollector::new(true));
        let batch = Arc::new(
            BatchProcessor::open(cache, Arc::new(Picky), dir.path())
                .await
                .unwrap()
                .with_metrics(Arc::clone(&metrics)),
        );

        batch.add_url(A, TaskPriority::Normal, Value::Null).await.unwrap();
        batch.add_url(B, TaskPriority::Normal, Value::Null).await.unwrap();
        assert_eq!(metrics.application_metrics().queue_size, 2);

        batch.process_queue(2, None).await.unwrap();
        assert_eq!(metrics.application_metrics().queue_size, 0);
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let dir = TempDir::new().unwrap();
        let cache = create_test_cache_pool().await.unwrap();
        let first = BatchProcessor::open(cache.clone(), Arc::new(Picky), dir.path())
            .await
            .unwrap();
        let id = first.add_url(A, TaskPriority::High, Value::Null).await.unwrap().unwrap();
        {
            let mut state = first.lock();
            state.queue.clear();
            if let Some(task) = state.tasks.get_mut(&id) {
                task.status = TaskStatus::Processing;
            }
        }
        first.save_queue().await.unwrap();

        let second = BatchProcessor::open(cache, Arc::new(Picky), dir.path())
            .await
            .unwrap();
        assert_eq!(second.queued_task_ids(), vec![id.clone()]);
        assert_eq!(second.get_task(&id).unwrap().status, TaskStatus::Queued);
        assert_eq!(second.stats().stats.total_tasks, 1);
    }

    #[tokio::test]
    async fn test_tracking_parameters_do_not_dodge_dedup() {
        let dir = TempDir::new().unwrap();
        let batch = processor(&dir).await;

        assert!(batch.add_url(A, TaskPriority::Normal, Value::Null).await.unwrap().is_some());
        let tracked = format!("{A}?utm_source=share&utm_medium=member_desktop");
        assert!(batch.add_url(&tracked, TaskPriority::Normal, Value::Null).await.unwrap().is_none());
        let slashed = format!("{A}/");
        assert!(batch.add_url(&slashed, TaskPriority::High, Value::Null).await.unwrap().is_none());

        assert_eq!(batch.queued_task_ids().len(), 1);
        assert_eq!(batch.stats().stats.duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn test_panicking_worker_fails_its_task() {
        let dir = TempDir::new().unwrap();
        let batch = processor(&dir).await;
        let crash = batch
            .add_url("https://www.linkedin.com/posts/jane-doe_crash-activity-5", TaskPriority::High, Value::Null)
            .await
            .unwrap()
            .unwrap();
        let fine = batch.add_url(B, TaskPriority::Normal, Value::Null).await.unwrap().unwrap();

        let report = batch.process_queue(2, None).await.unwrap();

        let crashed = batch.get_task(&crash).unwrap();
        assert_eq!(crashed.status, TaskStatus::Failed);
        assert!(crashed.completed_at.is_some());
        assert!(crashed.error_message.unwrap().starts_with("worker aborted"));
        assert_eq!(batch.get_task(&fine).unwrap().status, TaskStatus::Completed);
        assert_eq!(report.stats.failed_tasks, 1);
        assert_eq!(batch.progress().active_tasks, 0);
        assert!(!batch.is_processing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_saves_leave_readable_queue_file() {
        let dir = TempDir::new().unwrap();
        let batch = processor(&dir).await;
        let urls: Vec<String> = (0..150)
            .map(|n| format!("https://www.linkedin.com/posts/author-{n}_topic-activity-{n}"))
            .collect();
        let ids = batch.add_urls(&urls, TaskPriority::Normal).await;
        assert_eq!(ids.len(), 150);

        let mut cancels = JoinSet::new();
        for id in ids {
            let batch = Arc::clone(&batch);
            cancels.spawn(async move { batch.cancel_task(&id).await });
        }
        while let Some(joined) = cancels.join_next().await {
            assert!(joined.unwrap().unwrap());
        }

        let raw = std::fs::read_to_string(dir.path().join(QUEUE_FILE)).unwrap();
        let snapshot: QueueSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot.tasks.len(), 150);
        assert!(snapshot.task_queue.is_empty());
        assert_eq!(snapshot.stats.cancelled_tasks, 150);
        assert!(!dir.path().join("processing_queue.json.tmp").exists());

        let reopened = BatchProcessor::open(batch.cache.clone(), Arc::new(Picky), dir.path())
            .await
            .unwrap();
        assert_eq!(reopened.get_queue_status().status_distribution["cancelled"], 150);
    }

    #[test]
    fn test_priority_levels() {
        assert_eq!(TaskPriority::from_level(0), TaskPriority::Low);
        assert_eq!(TaskPriority::from_level(5), TaskPriority::High);
        assert_eq!(TaskPriority::from_level(9), TaskPriority::Urgent);
        assert_eq!(TaskPriority::from_level(42), TaskPriority::Critical);
        assert_eq!(serde_json::to_value(TaskPriority::Urgent).unwrap(), 8);
        assert!(TaskPriority::try_from(4).is_err());
    }
}
