//! Threshold alerts over the collected metrics and a periodic health check.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::metrics::{ApplicationMetrics, HealthLevel, MetricsCollector, SystemMetrics};

/// Alerts kept in the history, newest last.
const ALERT_HISTORY_LIMIT: usize = 1000;

pub const PII_RATE_ALERT: &str = "high_pii_detection_rate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub metadata: Value,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct AlertBook {
    active: HashMap<String, Alert>,
    history: VecDeque<Alert>,
}

/// Active alerts keyed by id, plus a bounded history.
#[derive(Debug, Default)]
pub struct AlertManager {
    book: Mutex<AlertBook>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise an alert. An active alert with the same id and severity is
    /// kept as is; a different severity replaces it.
    pub fn create_alert(
        &self,
        id: &str,
        title: &str,
        description: &str,
        severity: AlertSeverity,
        metadata: Value,
    ) -> Alert {
        let mut book = self.lock();
        if let Some(existing) = book.active.get(id)
            && existing.severity == severity
        {
            return existing.clone();
        }

        let alert = Alert {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            severity,
            timestamp: Utc::now(),
            source: "health_monitor".to_string(),
            metadata,
            resolved: false,
            resolved_at: None,
        };
        book.active.insert(id.to_string(), alert.clone());
        if book.history.len() == ALERT_HISTORY_LIMIT {
            book.history.pop_front();
        }
        book.history.push_back(alert.clone());

        match severity {
            AlertSeverity::Critical => error!(alert_id = id, %description, "Alert raised: {title}"),
            AlertSeverity::Warning => warn!(alert_id = id, %description, "Alert raised: {title}"),
            AlertSeverity::Info => info!(alert_id = id, %description, "Alert raised: {title}"),
        }
        alert
    }

    /// Returns `false` when no alert with `id` was active.
    pub fn resolve_alert(&self, id: &str) -> bool {
        let mut book = self.lock();
        let Some(alert) = book.active.remove(id) else {
            return false;
        };
        let resolved_at = Utc::now();
        if let Some(entry) = book
            .history
            .iter_mut()
            .rev()
            .find(|a| a.id == id && a.timestamp == alert.timestamp)
        {
            entry.resolved = true;
            entry.resolved_at = Some(resolved_at);
        }
        info!(alert_id = id, "Alert resolved: {}", alert.title);
        true
    }

    /// Active alerts, oldest first.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.lock().active.values().cloned().collect();
        alerts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    pub fn alert_history(&self, hours: i64) -> Vec<Alert> {
        let cutoff = Utc::now() - TimeDelta::hours(hours);
        self.lock()
            .history
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AlertBook> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthThresholds {
    pub cpu_percent: Threshold,
    pub memory_percent: Threshold,
    pub disk_percent: Threshold,
    /// Seconds
    pub response_time: Threshold,
    pub error_rate: Threshold,
    pub queue_size: Threshold,
    pub pii_detections_per_hour: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: Threshold { warning: 70.0, critical: 90.0 },
            memory_percent: Threshold { warning: 70.0, critical: 90.0 },
            disk_percent: Threshold { warning: 80.0, critical: 95.0 },
            response_time: Threshold { warning: 2.0, critical: 5.0 },
            error_rate: Threshold { warning: 0.05, critical: 0.15 },
            queue_size: Threshold { warning: 50.0, critical: 100.0 },
            pii_detections_per_hour: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub id: String,
    pub title: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthLevel,
    pub system_metrics: Option<SystemMetrics>,
    pub application_metrics: ApplicationMetrics,
    pub active_alerts: Vec<AlertSummary>,
    pub timestamp: DateTime<Utc>,
}

/// Last PII total seen and when, for the per-hour rate.
#[derive(Debug, Clone, Copy)]
struct PiiReading {
    at: DateTime<Utc>,
    total: u64,
}

/// Compares metrics against [`HealthThresholds`] and keeps alerts current.
#[derive(Debug)]
pub struct HealthMonitor {
    metrics: Arc<MetricsCollector>,
    alerts: AlertManager,
    thresholds: HealthThresholds,
    last_pii: Mutex<Option<PiiReading>>,
}

impl HealthMonitor {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self::with_thresholds(metrics, HealthThresholds::default())
    }

    pub fn with_thresholds(metrics: Arc<MetricsCollector>, thresholds: HealthThresholds) -> Self {
        Self {
            metrics,
            alerts: AlertManager::new(),
            thresholds,
            last_pii: Mutex::new(None),
        }
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// Read the collector and raise or resolve alerts.
    pub fn check(&self) {
        if !self.metrics.is_enabled() {
            return;
        }
        let system = self.metrics.system_metrics();
        let app = self.metrics.application_metrics();
        self.evaluate(Some(&system), &app, Utc::now());
    }

    /// Apply the thresholds to one set of readings.
    pub fn evaluate(
        &self,
        system: Option<&SystemMetrics>,
        app: &ApplicationMetrics,
        now: DateTime<Utc>,
    ) {
        let t = &self.thresholds;
        if let Some(system) = system {
            self.check_threshold(
                "cpu_usage",
                system.cpu_percent,
                t.cpu_percent,
                "High CPU Usage",
                format!("CPU usage is {:.1}%", system.cpu_percent),
            );
            self.check_threshold(
                "memory_usage",
                system.memory_percent,
                t.memory_percent,
                "High Memory Usage",
                format!(
                    "Memory usage is {:.1}% ({:.1}MB)",
                    system.memory_percent, system.memory_used_mb
                ),
            );
            self.check_threshold(
                "disk_usage",
                system.disk_usage_percent,
                t.disk_percent,
                "High Disk Usage",
                format!(
                    "Disk usage is {:.1}% ({:.1}GB free)",
                    system.disk_usage_percent, system.disk_free_gb
                ),
            );
        }

        if app.avg_response_time > 0.0 {
            self.check_threshold(
                "response_time",
                app.avg_response_time,
                t.response_time,
                "High Response Time",
                format!("Average response time is {:.2} seconds", app.avg_response_time),
            );
        }
        if app.total_requests > 0 {
            self.check_threshold(
                "error_rate",
                app.error_rate,
                t.error_rate,
                "High Error Rate",
                format!(
                    "Error rate is {:.1}% ({}/{})",
                    app.error_rate * 100.0,
                    app.failed_requests,
                    app.total_requests
                ),
            );
        }
        self.check_threshold(
            "queue_size",
            app.queue_size as f64,
            t.queue_size,
            "Large Processing Queue",
            format!("Processing queue has {} items", app.queue_size),
        );
        self.check_pii_rate(app.pii_detections, now);
    }

    /// Overall status from the active alerts plus the current readings.
    pub fn health_status(&self) -> SystemHealth {
        let active = self.alerts.active_alerts();
        let overall_status = match active.iter().map(|a| a.severity).max() {
            Some(AlertSeverity::Critical) => HealthLevel::Critical,
            Some(AlertSeverity::Warning) => HealthLevel::Warning,
            _ => HealthLevel::Healthy,
        };
        SystemHealth {
            overall_status,
            system_metrics: self
                .metrics
                .is_enabled()
                .then(|| self.metrics.system_metrics()),
            application_metrics: self.metrics.application_metrics(),
            active_alerts: active
                .into_iter()
                .map(|a| AlertSummary {
                    id: a.id,
                    title: a.title,
                    severity: a.severity,
                    timestamp: a.timestamp,
                })
                .collect(),
            timestamp: Utc::now(),
        }
    }

    /// Run [`check`](Self::check) every `interval` until the task is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Health monitor started");
            loop {
                ticker.tick().await;
                let monitor = Arc::clone(&self);
                // sysinfo reads block briefly
                if let Err(e) = tokio::task::spawn_blocking(move || monitor.check()).await {
                    error!(error = %e, "Health check failed");
                }
            }
        })
    }

    fn check_threshold(
        &self,
        kind: &str,
        value: f64,
        threshold: Threshold,
        title: &str,
        description: String,
    ) {
        let id = format!("{kind}_alert");
        let (severity, limit) = if value >= threshold.critical {
            (AlertSeverity::Critical, threshold.critical)
        } else if value >= threshold.warning {
            (AlertSeverity::Warning, threshold.warning)
        } else {
            self.alerts.resolve_alert(&id);
            return;
        };
        self.alerts.create_alert(
            &id,
            title,
            &description,
            severity,
            json!({ "current_value": value, "threshold": limit }),
        );
    }

    fn check_pii_rate(&self, total: u64, now: DateTime<Utc>) {
        let mut last = self.last_pii.lock().unwrap_or_else(|e| e.into_inner());
        let previous = last.replace(PiiReading { at: now, total });
        let Some(previous) = previous else {
            return;
        };
        let hours = (now - previous.at).num_milliseconds() as f64 / 3_600_000.0;
        if hours <= 0.0 {
            return;
        }
        let rate = total.saturating_sub(previous.total) as f64 / hours;
        if rate >= self.thresholds.pii_detections_per_hour {
            self.alerts.create_alert(
                PII_RATE_ALERT,
                "High PII Detection Rate",
                &format!("PII detection rate is {rate:.1} detections per hour"),
                AlertSeverity::Warning,
                json!({ "pii_rate_per_hour": rate }),
            );
        } else {
            self.alerts.resolve_alert(PII_RATE_ALERT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(Arc::new(MetricsCollector::new(true)))
    }

    fn system(cpu: f64, memory: f64, disk: f64) -> SystemMetrics {
        SystemMetrics {
            cpu_percent: cpu,
            memory_percent: memory,
            memory_used_mb: 512.0,
            memory_total_mb: 1024.0,
            disk_usage_percent: disk,
            disk_free_gb: 20.0,
            uptime_seconds: 60,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn ids(monitor: &HealthMonitor) -> Vec<(String, AlertSeverity)> {
        monitor
            .alerts()
            .active_alerts()
            .into_iter()
            .map(|a| (a.id, a.severity))
            .collect()
    }

    #[test]
    fn test_system_thresholds_raise_and_resolve() {
        let monitor = monitor();
        let app = ApplicationMetrics::default();

        monitor.evaluate(Some(&system(75.0, 10.0, 96.0)), &app, at(10, 0));
        let mut active = ids(&monitor);
        active.sort();
        assert_eq!(
            active,
            vec![
                ("cpu_usage_alert".to_string(), AlertSeverity::Warning),
                ("disk_usage_alert".to_string(), AlertSeverity::Critical),
            ]
        );
        assert_eq!(monitor.health_status().overall_status, HealthLevel::Critical);

        monitor.evaluate(Some(&system(10.0, 10.0, 10.0)), &app, at(10, 1));
        assert!(ids(&monitor).is_empty());
        assert_eq!(monitor.health_status().overall_status, HealthLevel::Healthy);

        let history = monitor.alerts().alert_history(24);
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|a| a.resolved && a.resolved_at.is_some()));
    }

    #[test]
    fn test_repeated_breach_keeps_one_alert_until_severity_changes() {
        let monitor = monitor();
        let mut app = ApplicationMetrics {
            total_requests: 100,
            failed_requests: 8,
            error_rate: 0.08,
            ..Default::default()
        };
        monitor.evaluate(None, &app, at(10, 0));
        monitor.evaluate(None, &app, at(10, 1));
        assert_eq!(monitor.alerts().alert_history(24).len(), 1);
        assert_eq!(
            ids(&monitor),
            vec![("error_rate_alert".to_string(), AlertSeverity::Warning)]
        );

        app.error_rate = 0.2;
        monitor.evaluate(None, &app, at(10, 2));
        assert_eq!(
            ids(&monitor),
            vec![("error_rate_alert".to_string(), AlertSeverity::Critical)]
        );
        assert_eq!(monitor.alerts().alert_history(24).len(), 2);
    }

    #[test]
    fn test_queue_and_response_time_alerts() {
        let monitor = monitor();
        let app = ApplicationMetrics {
            avg_response_time: 2.5,
            queue_size: 120,
            ..Default::default()
        };
        monitor.evaluate(None, &app, at(10, 0));
        let mut active = ids(&monitor);
        active.sort();
        assert_eq!(
            active,
            vec![
                ("queue_size_alert".to_string(), AlertSeverity::Critical),
                ("response_time_alert".to_string(), AlertSeverity::Warning),
            ]
        );
    }

    #[test]
    fn test_pii_rate_alert() {
        let monitor = monitor();
        let mut app = ApplicationMetrics::default();

        // The first reading only sets the baseline.
        monitor.evaluate(None, &app, at(10, 0));
        assert!(ids(&monitor).is_empty());

        // 6 detections in 30 minutes is 12 per hour.
        app.pii_detections = 6;
        monitor.evaluate(None, &app, at(10, 30));
        assert_eq!(
            ids(&monitor),
            vec![(PII_RATE_ALERT.to_string(), AlertSeverity::Warning)]
        );

        app.pii_detections = 7;
        monitor.evaluate(None, &app, at(11, 30));
        assert!(ids(&monitor).is_empty());
    }

    #[test]
    fn test_resolve_unknown_alert() {
        let alerts = AlertManager::new();
        assert!(!alerts.resolve_alert("missing"));
        alerts.create_alert("custom", "Custom", "details", AlertSeverity::Info, Value::Null);
        assert!(alerts.resolve_alert("custom"));
        assert!(alerts.active_alerts().is_empty());
    }
}
