//! In-process counters for the HTTP API, PII handling and the pipeline,
//! plus host resource readings.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Disks, System};

/// Response times kept for the moving average.
pub const RESPONSE_TIME_WINDOW: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

impl HealthLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub disk_usage_percent: f64,
    pub disk_free_gb: f64,
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    /// Mean of the last [`RESPONSE_TIME_WINDOW`] responses, in seconds
    pub avg_response_time: f64,
    pub requests_by_endpoint: BTreeMap<String, u64>,
    pub errors_by_endpoint: BTreeMap<String, u64>,
    pub knowledge_items_processed: u64,
    pub pii_detections: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub queue_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub enabled: bool,
    pub system: Option<SystemMetrics>,
    pub application: ApplicationMetrics,
    pub health: HealthLevel,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    requests: BTreeMap<String, u64>,
    errors: BTreeMap<String, u64>,
    response_times: VecDeque<f64>,
    knowledge_items_processed: u64,
    pii_detections: u64,
    cache_hits: u64,
    cache_misses: u64,
    queue_size: usize,
}

/// Shared counters. Every `record_*` call is a no-op when collection is
/// disabled.
#[derive(Debug)]
pub struct MetricsCollector {
    enabled: bool,
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
    // Kept between readings so CPU usage has a previous sample to diff against.
    system: Mutex<Option<System>>,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            started_at: Utc::now(),
            counters: Mutex::new(Counters::default()),
            system: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count one HTTP response. Statuses of 400 and above count as errors.
    pub fn record_request(&self, method: &str, endpoint: &str, status: u16, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let key = format!("{method}:{endpoint}");
        let mut counters = self.lock();
        *counters.requests.entry(key.clone()).or_default() += 1;
        if status >= 400 {
            *counters.errors.entry(key).or_default() += 1;
        }
        if counters.response_times.len() == RESPONSE_TIME_WINDOW {
            counters.response_times.pop_front();
        }
        counters.response_times.push_back(elapsed.as_secs_f64());
    }

    pub fn record_pii_detection(&self, count: usize) {
        if self.enabled && count > 0 {
            self.lock().pii_detections += count as u64;
        }
    }

    pub fn record_knowledge_item_processed(&self) {
        if self.enabled {
            self.lock().knowledge_items_processed += 1;
        }
    }

    pub fn record_cache_operation(&self, outcome: CacheOutcome) {
        if !self.enabled {
            return;
        }
        let mut counters = self.lock();
        match outcome {
            CacheOutcome::Hit => counters.cache_hits += 1,
            CacheOutcome::Miss => counters.cache_misses += 1,
        }
    }

    pub fn update_queue_size(&self, size: usize) {
        if self.enabled {
            self.lock().queue_size = size;
        }
    }

    pub fn application_metrics(&self) -> ApplicationMetrics {
        let counters = self.lock();
        let total_requests: u64 = counters.requests.values().sum();
        let failed_requests: u64 = counters.errors.values().sum();
        let avg_response_time = if counters.response_times.is_empty() {
            0.0
        } else {
            counters.response_times.iter().sum::<f64>() / counters.response_times.len() as f64
        };
        let cache_lookups = counters.cache_hits + counters.cache_misses;

        ApplicationMetrics {
            total_requests,
            successful_requests: total_requests - failed_requests,
            failed_requests,
            error_rate: ratio(failed_requests, total_requests),
            avg_response_time,
            requests_by_endpoint: counters.requests.clone(),
            errors_by_endpoint: counters.errors.clone(),
            knowledge_items_processed: counters.knowledge_items_processed,
            pii_detections: counters.pii_detections,
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            cache_hit_rate: ratio(counters.cache_hits, cache_lookups),
            queue_size: counters.queue_size,
        }
    }

    /// Read CPU, memory and disk usage of the host.
    pub fn system_metrics(&self) -> SystemMetrics {
        let mut guard = self.system.lock().unwrap_or_else(|e| e.into_inner());
        let system = guard.get_or_insert_with(System::new);
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total_memory = system.total_memory();
        let used_memory = system.used_memory();
        let (disk_total, disk_free) = Disks::new_with_refreshed_list()
            .list()
            .iter()
            .fold((0u64, 0u64), |(total, free), disk| {
                (total + disk.total_space(), free + disk.available_space())
            });

        SystemMetrics {
            cpu_percent: f64::from(system.global_cpu_usage()),
            memory_percent: percent(used_memory, total_memory),
            memory_used_mb: used_memory as f64 / (1024.0 * 1024.0),
            memory_total_mb: total_memory as f64 / (1024.0 * 1024.0),
            disk_usage_percent: percent(disk_total.saturating_sub(disk_free), disk_total),
            disk_free_gb: disk_free as f64 / (1024.0 * 1024.0 * 1024.0),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
        }
    }

    /// Application counters, host readings and the combined health level.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let application = self.application_metrics();
        let system = self.enabled.then(|| self.system_metrics());
        MetricsSnapshot {
            enabled: self.enabled,
            health: health_level(system.as_ref(), &application),
            system,
            application,
            timestamp: Utc::now(),
        }
    }

    /// Plain-text `name value` lines for scrapers.
    pub fn export_metrics(&self) -> String {
        let snapshot = self.snapshot();
        let app = &snapshot.application;
        let mut out = String::new();
        if let Some(system) = &snapshot.system {
            let _ = writeln!(out, "system_cpu_percent {:.2}", system.cpu_percent);
            let _ = writeln!(out, "system_memory_percent {:.2}", system.memory_percent);
            let _ = writeln!(out, "system_disk_usage_percent {:.2}", system.disk_usage_percent);
            let _ = writeln!(out, "system_uptime_seconds {}", system.uptime_seconds);
        }
        let _ = writeln!(out, "http_requests_total {}", app.total_requests);
        let _ = writeln!(out, "http_requests_successful {}", app.successful_requests);
        let _ = writeln!(out, "http_requests_failed {}", app.failed_requests);
        let _ = writeln!(out, "http_response_time_avg {:.4}", app.avg_response_time);
        let _ = writeln!(out, "knowledge_items_processed {}", app.knowledge_items_processed);
        let _ = writeln!(out, "pii_detections_total {}", app.pii_detections);
        let _ = writeln!(out, "cache_hits_total {}", app.cache_hits);
        let _ = writeln!(out, "cache_misses_total {}", app.cache_misses);
        let _ = writeln!(out, "processing_queue_size {}", app.queue_size);
        out
    }

    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Critical above 90% CPU or memory, a 20% error rate or a 10 s average
/// response; warning above 70%, 10% and 5 s.
pub fn health_level(system: Option<&SystemMetrics>, app: &ApplicationMetrics) -> HealthLevel {
    let (cpu, memory) = system.map_or((0.0, 0.0), |s| (s.cpu_percent, s.memory_percent));
    if cpu > 90.0 || memory > 90.0 || app.error_rate > 0.2 || app.avg_response_time > 10.0 {
        HealthLevel::Critical
    } else if cpu > 70.0 || memory > 70.0 || app.error_rate > 0.1 || app.avg_response_time > 5.0 {
        HealthLevel::Warning
    } else {
        HealthLevel::Healthy
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}

fn percent(part: u64, whole: u64) -> f64 {
    ratio(part, whole) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_requests_and_errors_by_endpoint() {
        let metrics = MetricsCollector::new(true);
        metrics.record_request("GET", "/api/v1/health", 200, ms(100));
        metrics.record_request("GET", "/api/v1/health", 200, ms(300));
        metrics.record_request("POST", "/api/v1/urls/add", 400, ms(200));
        metrics.record_request("GET", "/api/v1/tasks/{id}", 404, ms(200));

        let app = metrics.application_metrics();
        assert_eq!(app.total_requests, 4);
        assert_eq!(app.failed_requests, 2);
        assert_eq!(app.successful_requests, 2);
        assert!((app.error_rate - 0.5).abs() < f64::EPSILON);
        assert!((app.avg_response_time - 0.2).abs() < 1e-9);
        assert_eq!(app.requests_by_endpoint["GET:/api/v1/health"], 2);
        assert_eq!(app.errors_by_endpoint["POST:/api/v1/urls/add"], 1);
        assert!(!app.errors_by_endpoint.contains_key("GET:/api/v1/health"));
    }

    #[test]
    fn test_response_window_is_bounded() {
        let metrics = MetricsCollector::new(true);
        metrics.record_request("GET", "/slow", 200, Duration::from_secs(100));
        for _ in 0..RESPONSE_TIME_WINDOW {
            metrics.record_request("GET", "/fast", 200, ms(10));
        }
        let app = metrics.application_metrics();
        assert_eq!(app.total_requests, RESPONSE_TIME_WINDOW as u64 + 1);
        assert!((app.avg_response_time - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_pipeline_counters() {
        let metrics = MetricsCollector::new(true);
        metrics.record_pii_detection(3);
        metrics.record_pii_detection(0);
        metrics.record_knowledge_item_processed();
        metrics.record_cache_operation(CacheOutcome::Hit);
        metrics.record_cache_operation(CacheOutcome::Miss);
        metrics.record_cache_operation(CacheOutcome::Miss);
        metrics.record_cache_operation(CacheOutcome::Miss);
        metrics.update_queue_size(7);

        let app = metrics.application_metrics();
        assert_eq!(app.pii_detections, 3);
        assert_eq!(app.knowledge_items_processed, 1);
        assert_eq!(app.cache_hits, 1);
        assert_eq!(app.cache_misses, 3);
        assert!((app.cache_hit_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(app.queue_size, 7);

        metrics.reset();
        assert_eq!(metrics.application_metrics(), ApplicationMetrics::default());
    }

    #[test]
    fn test_disabled_collector_records_nothing() {
        let metrics = MetricsCollector::new(false);
        metrics.record_request("GET", "/", 500, ms(1));
        metrics.record_pii_detection(2);
        metrics.record_knowledge_item_processed();

        let snapshot = metrics.snapshot();
        assert!(!snapshot.enabled);
        assert!(snapshot.system.is_none());
        assert_eq!(snapshot.application, ApplicationMetrics::default());
        assert_eq!(snapshot.health, HealthLevel::Healthy);
    }

    #[test]
    fn test_health_level_thresholds() {
        let mut app = ApplicationMetrics::default();
        assert_eq!(health_level(None, &app), HealthLevel::Healthy);

        app.error_rate = 0.15;
        assert_eq!(health_level(None, &app), HealthLevel::Warning);
        app.error_rate = 0.25;
        assert_eq!(health_level(None, &app), HealthLevel::Critical);

        let app = ApplicationMetrics {
            avg_response_time: 6.0,
            ..Default::default()
        };
        assert_eq!(health_level(None, &app), HealthLevel::Warning);

        let system = SystemMetrics {
            cpu_percent: 95.0,
            memory_percent: 10.0,
            memory_used_mb: 100.0,
            memory_total_mb: 1000.0,
            disk_usage_percent: 10.0,
            disk_free_gb: 50.0,
            uptime_seconds: 1,
        };
        assert_eq!(
            health_level(Some(&system), &ApplicationMetrics::default()),
            HealthLevel::Critical
        );
    }

    #[test]
    fn test_export_lists_counters() {
        let metrics = MetricsCollector::new(true);
        metrics.record_request("GET", "/api/v1/stats", 200, ms(5));
        metrics.record_request("GET", "/api/v1/stats", 500, ms(5));
        metrics.record_pii_detection(4);

        let text = metrics.export_metrics();
        assert!(text.contains("http_requests_total 2\n"));
        assert!(text.contains("http_requests_failed 1\n"));
        assert!(text.contains("pii_detections_total 4\n"));
        assert!(text.contains("system_cpu_percent "));
    }
}
