//! Retry policies per error type and a bounded in-memory error log.
//!
//! [`ErrorHandler::execute_with_retry`] runs an async operation, classifies
//! each failure, records it and decides between retrying and giving up.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

const MAX_RECORDS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Scraping,
    Api,
    Processing,
    Storage,
    Validation,
    Configuration,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Scraping => "scraping",
            ErrorKind::Api => "api",
            ErrorKind::Processing => "processing",
            ErrorKind::Storage => "storage",
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "scraping" => ErrorKind::Scraping,
            "api" => ErrorKind::Api,
            "processing" => ErrorKind::Processing,
            "storage" => ErrorKind::Storage,
            "validation" => ErrorKind::Validation,
            "configuration" => ErrorKind::Configuration,
            _ => ErrorKind::Unknown,
        }
    }

    pub fn severity(self) -> ErrorSeverity {
        match self {
            ErrorKind::Configuration => ErrorSeverity::Critical,
            ErrorKind::Api | ErrorKind::Storage => ErrorSeverity::High,
            ErrorKind::Scraping | ErrorKind::Processing | ErrorKind::Unknown => {
                ErrorSeverity::Medium
            }
            ErrorKind::Validation => ErrorSeverity::Low,
        }
    }

    fn default_action(self) -> RecoveryAction {
        match self {
            ErrorKind::Configuration => RecoveryAction::Abort,
            ErrorKind::Processing => RecoveryAction::Fallback,
            ErrorKind::Validation => RecoveryAction::Skip,
            ErrorKind::Scraping | ErrorKind::Api | ErrorKind::Storage | ErrorKind::Unknown => {
                RecoveryAction::Retry
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can be routed to a retry policy.
pub trait Classify {
    fn error_kind(&self) -> ErrorKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    Skip,
    Abort,
    Fallback,
    ManualIntervention,
}

impl RecoveryAction {
    /// Message keywords win over the per-type default.
    pub fn determine(kind: ErrorKind, message: &str) -> Self {
        let lower = message.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if mentions(&["rate limit", "quota", "too many requests"])
            || mentions(&["network", "connection", "timeout", "unreachable"])
        {
            RecoveryAction::Retry
        } else if mentions(&["unauthorized", "forbidden", "authentication"]) {
            RecoveryAction::ManualIntervention
        } else if mentions(&["invalid", "malformed", "validation"]) {
            RecoveryAction::Skip
        } else {
            kind.default_action()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
    pub jitter: bool,
}

impl RetryPolicy {
    const fn new(max_retries: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            exponential: true,
            jitter: true,
        }
    }

    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Scraping => Self::new(3, 2_000, 30_000),
            ErrorKind::Api => Self::new(5, 1_000, 60_000),
            ErrorKind::Processing => Self::new(2, 1_000, 10_000),
            ErrorKind::Storage => Self::new(3, 500, 5_000),
            ErrorKind::Validation => Self::new(1, 100, 1_000),
            ErrorKind::Configuration | ErrorKind::Unknown => Self::new(2, 1_000, 10_000),
        }
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut delay = if self.exponential {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(self.max_delay)
        } else {
            self.base_delay.min(self.max_delay)
        };
        if self.jitter {
            delay = delay.mul_f64(0.5 + rand::random::<f64>() * 0.5);
        }
        delay
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub error_type: ErrorKind,
    pub message: String,
    pub severity: ErrorSeverity,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
    pub recovery_action: RecoveryAction,
    pub retry_count: u32,
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCount {
    pub error_type: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub error_counts_by_type: BTreeMap<String, usize>,
    pub errors_last_24h: usize,
    pub errors_last_hour: usize,
    pub severity_distribution: BTreeMap<String, usize>,
    pub recovery_success_rate: f64,
    pub most_common_errors: Vec<ErrorCount>,
}

#[derive(Debug, Default)]
struct ErrorLog {
    records: Vec<ErrorRecord>,
    counts: BTreeMap<ErrorKind, usize>,
    next_id: u64,
}

/// Keeps the most recent error records and per-type counters.
#[derive(Debug, Default)]
pub struct ErrorHandler {
    log: Mutex<ErrorLog>,
    overrides: BTreeMap<ErrorKind, RetryPolicy>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the policy used for one error type.
    pub fn with_policy(mut self, kind: ErrorKind, policy: RetryPolicy) -> Self {
        self.overrides.insert(kind, policy);
        self
    }

    pub fn policy(&self, kind: ErrorKind) -> RetryPolicy {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| RetryPolicy::for_kind(kind))
    }

    pub fn record_error(
        &self,
        kind: ErrorKind,
        message: &str,
        context: Value,
        retry_count: u32,
    ) -> ErrorRecord {
        let mut log = self.lock();
        log.next_id += 1;
        let record = ErrorRecord {
            id: format!("err_{}_{}", Utc::now().timestamp_millis(), log.next_id),
            error_type: kind,
            message: message.to_string(),
            severity: kind.severity(),
            timestamp: Utc::now(),
            context,
            recovery_action: RecoveryAction::determine(kind, message),
            retry_count,
            resolved: false,
        };

        match record.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(error_type = %kind, action = ?record.recovery_action, message, "error recorded")
            }
            ErrorSeverity::Medium => {
                warn!(error_type = %kind, action = ?record.recovery_action, message, "error recorded")
            }
            ErrorSeverity::Low => {
                info!(error_type = %kind, action = ?record.recovery_action, message, "error recorded")
            }
        }

        *log.counts.entry(kind).or_default() += 1;
        log.records.push(record.clone());
        if log.records.len() > MAX_RECORDS {
            let excess = log.records.len() - MAX_RECORDS;
            log.records.drain(..excess);
        }
        record
    }

    /// Run `operation` until it succeeds or its error type's policy says stop.
    ///
    /// Only failures whose recovery action is [`RecoveryAction::Retry`] are
    /// retried, so validation errors are never repeated.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        context: Value,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let mut attempt = 0u32;
        let mut failed_ids = Vec::new();

        loop {
            match operation().await {
                Ok(value) => {
                    if !failed_ids.is_empty() {
                        self.mark_resolved(&failed_ids);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let kind = e.error_kind();
                    let policy = self.policy(kind);
                    let record = self.record_error(kind, &e.to_string(), context.clone(), attempt);
                    failed_ids.push(record.id);

                    if record.recovery_action != RecoveryAction::Retry
                        || kind == ErrorKind::Validation
                        || attempt >= policy.max_retries
                    {
                        return Err(e);
                    }

                    let delay = policy.delay(attempt);
                    info!(
                        error_type = %kind,
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn statistics(&self) -> ErrorStatistics {
        let log = self.lock();
        let now = Utc::now();
        let day_ago = now - TimeDelta::hours(24);
        let hour_ago = now - TimeDelta::hours(1);

        let mut severity_distribution = BTreeMap::new();
        for record in &log.records {
            *severity_distribution
                .entry(record.severity.as_str().to_string())
                .or_insert(0) += 1;
        }

        let resolved = log.records.iter().filter(|r| r.resolved).count();
        let recovery_success_rate = if log.records.is_empty() {
            0.0
        } else {
            resolved as f64 / log.records.len() as f64
        };

        let mut most_common: Vec<ErrorCount> = log
            .counts
            .iter()
            .map(|(kind, count)| ErrorCount {
                error_type: kind.to_string(),
                count: *count,
            })
            .collect();
        most_common.sort_by(|a, b| b.count.cmp(&a.count));
        most_common.truncate(5);

        ErrorStatistics {
            total_errors: log.records.len(),
            error_counts_by_type: log
                .counts
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
            errors_last_24h: log.records.iter().filter(|r| r.timestamp > day_ago).count(),
            errors_last_hour: log.records.iter().filter(|r| r.timestamp > hour_ago).count(),
            severity_distribution,
            recovery_success_rate,
            most_common_errors: most_common,
        }
    }

    /// Drop records older than `days`. Returns how many were removed.
    pub fn clear_old_errors(&self, days: i64) -> usize {
        let cutoff = Utc::now() - TimeDelta::days(days);
        let mut log = self.lock();
        let before = log.records.len();
        log.records.retain(|r| r.timestamp > cutoff);
        before - log.records.len()
    }

    fn mark_resolved(&self, ids: &[String]) {
        let mut log = self.lock();
        for record in log.records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.resolved = true;
        }
    }

    fn lock(&self) -> MutexGuard<'_, ErrorLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Failure(ErrorKind, &'static str);

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.1)
        }
    }

    impl Classify for Failure {
        fn error_kind(&self) -> ErrorKind {
            self.0
        }
    }

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential: true,
            jitter: false,
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::for_kind(ErrorKind::Scraping)
        };
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(30));

        let jittered = RetryPolicy::for_kind(ErrorKind::Storage).delay(0);
        assert!(jittered >= Duration::from_millis(250) && jittered <= Duration::from_millis(500));
    }

    #[test]
    fn recovery_action_keywords() {
        assert_eq!(
            RecoveryAction::determine(ErrorKind::Processing, "connection reset"),
            RecoveryAction::Retry
        );
        assert_eq!(
            RecoveryAction::determine(ErrorKind::Api, "401 Unauthorized"),
            RecoveryAction::ManualIntervention
        );
        assert_eq!(
            RecoveryAction::determine(ErrorKind::Storage, "malformed row"),
            RecoveryAction::Skip
        );
        assert_eq!(
            RecoveryAction::determine(ErrorKind::Configuration, "missing key"),
            RecoveryAction::Abort
        );
    }

    #[tokio::test]
    async fn execute_with_retry_recovers() {
        let handler = ErrorHandler::new().with_policy(ErrorKind::Storage, instant(3));
        let calls = &AtomicU32::new(0);

        let result: Result<u32, Failure> = handler
            .execute_with_retry(serde_json::json!({"op": "save"}), move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Failure(ErrorKind::Storage, "disk busy"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        let stats = handler.statistics();
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.error_counts_by_type["storage"], 2);
        assert_eq!(stats.severity_distribution["high"], 2);
        assert!((stats.recovery_success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let handler = ErrorHandler::new().with_policy(ErrorKind::Validation, instant(5));
        let calls = &AtomicU32::new(0);

        let result: Result<(), Failure> = handler
            .execute_with_retry(Value::Null, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Failure(ErrorKind::Validation, "empty field"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_policy_limit() {
        let handler = ErrorHandler::new().with_policy(ErrorKind::Api, instant(2));
        let calls = &AtomicU32::new(0);

        let result: Result<(), Failure> = handler
            .execute_with_retry(Value::Null, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Failure(ErrorKind::Api, "upstream 503"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = handler.statistics();
        assert_eq!(stats.most_common_errors[0].error_type, "api");
        assert_eq!(stats.errors_last_hour, 3);
        assert_eq!(handler.clear_old_errors(1), 0);
    }
}
