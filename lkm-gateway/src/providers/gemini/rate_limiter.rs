//! Sliding-window per-minute limiter with daily request and token counters
//! that reset at UTC midnight.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Snapshot returned by [`RateLimiter::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub requests_this_minute: usize,
    pub requests_per_minute_limit: u32,
    pub requests_today: usize,
    pub requests_per_day_limit: u32,
    pub tokens_today: u64,
    pub tokens_per_day_limit: u64,
    pub token_reset_time: DateTime<Utc>,
}

#[derive(Debug)]
struct Windows {
    minute: VecDeque<DateTime<Utc>>,
    day: VecDeque<DateTime<Utc>>,
    tokens_today: u64,
    /// Start of the next calendar day, set on first use.
    token_reset: Option<DateTime<Utc>>,
}

impl Windows {
    fn prune(&mut self, now: DateTime<Utc>) {
        let minute_ago = now - TimeDelta::minutes(1);
        while self.minute.front().is_some_and(|t| *t <= minute_ago) {
            self.minute.pop_front();
        }
        match self.token_reset {
            Some(reset) if now < reset => {}
            Some(_) => {
                self.day.clear();
                self.tokens_today = 0;
                self.token_reset = Some(next_midnight(now));
            }
            None => self.token_reset = Some(next_midnight(now)),
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    requests_per_day: u32,
    max_tokens_per_day: u64,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, requests_per_day: u32, max_tokens_per_day: u64) -> Self {
        Self {
            requests_per_minute,
            requests_per_day,
            max_tokens_per_day,
            windows: Mutex::new(Windows {
                minute: VecDeque::new(),
                day: VecDeque::new(),
                tokens_today: 0,
                token_reset: None,
            }),
        }
    }

    /// How long a request issued at `now` has to wait, if at all.
    pub fn delay_needed(&self, now: DateTime<Utc>) -> Option<Duration> {
        let mut windows = self.lock();
        windows.prune(now);

        if windows.day.len() >= self.requests_per_day as usize {
            return (next_midnight(now) - now).to_std().ok();
        }

        if windows.minute.len() >= self.requests_per_minute as usize
            && let Some(oldest) = windows.minute.front()
        {
            let wait = TimeDelta::seconds(60) - (now - *oldest);
            if wait > TimeDelta::zero() {
                return wait.to_std().ok();
            }
        }

        None
    }

    /// Sleep until both windows have room. A full day waits once, until
    /// midnight, when the daily counters reset.
    pub async fn wait_if_needed(&self) {
        while let Some(wait) = self.delay_needed(Utc::now()) {
            if wait > Duration::from_secs(60) {
                warn!(hours = wait.as_secs_f64() / 3600.0, "daily request limit reached");
            } else {
                info!(seconds = wait.as_secs_f64(), "minute request limit reached, waiting");
            }
            tokio::time::sleep(wait).await;
        }
    }

    pub fn record_request(&self, tokens_used: u64) {
        self.record_request_at(Utc::now(), tokens_used);
    }

    pub fn record_request_at(&self, now: DateTime<Utc>, tokens_used: u64) {
        let mut windows = self.lock();
        windows.prune(now);
        windows.minute.push_back(now);
        windows.day.push_back(now);
        windows.tokens_today += tokens_used;

        if windows.tokens_today > self.max_tokens_per_day {
            warn!(
                tokens_today = windows.tokens_today,
                limit = self.max_tokens_per_day,
                "daily token budget exceeded"
            );
        }
    }

    pub fn status(&self) -> RateLimitStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> RateLimitStatus {
        let mut windows = self.lock();
        windows.prune(now);
        RateLimitStatus {
            requests_this_minute: windows.minute.len(),
            requests_per_minute_limit: self.requests_per_minute,
            requests_today: windows.day.len(),
            requests_per_day_limit: self.requests_per_day,
            tokens_today: windows.tokens_today,
            tokens_per_day_limit: self.max_tokens_per_day,
            token_reset_time: windows.token_reset.unwrap_or_else(|| next_midnight(now)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Windows> {
        // The windows hold plain counters, so a poisoned lock is still usable.
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    tomorrow.and_time(NaiveTime::default()).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_minute_window_waits_for_oldest_request() {
        let limiter = RateLimiter::new(2, 100, 1_000);
        limiter.record_request_at(at(10, 0, 0), 10);
        limiter.record_request_at(at(10, 0, 20), 10);

        let wait = limiter.delay_needed(at(10, 0, 30)).unwrap();
        assert_eq!(wait, Duration::from_secs(30));

        // The first request leaves the window after a minute.
        assert!(limiter.delay_needed(at(10, 1, 0)).is_none());
    }

    #[test]
    fn test_daily_window_waits_until_midnight() {
        let limiter = RateLimiter::new(100, 2, 1_000);
        limiter.record_request_at(at(22, 0, 0), 1);
        limiter.record_request_at(at(22, 30, 0), 1);

        let wait = limiter.delay_needed(at(23, 0, 0)).unwrap();
        assert_eq!(wait, Duration::from_secs(3600));
    }

    #[test]
    fn test_daily_limit_lifts_at_midnight() {
        let limiter = RateLimiter::new(100, 2, 1_000);
        limiter.record_request_at(at(22, 0, 0), 7);
        limiter.record_request_at(at(22, 30, 0), 7);
        assert!(limiter.delay_needed(at(23, 59, 59)).is_some());

        let after_midnight = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 1).unwrap();
        assert!(limiter.delay_needed(after_midnight).is_none());
        let status = limiter.status_at(after_midnight);
        assert_eq!(status.requests_today, 0);
        assert_eq!(status.tokens_today, 0);
        assert_eq!(status.token_reset_time, Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_tokens_reset_after_midnight() {
        let limiter = RateLimiter::new(10, 100, 1_000);
        limiter.record_request_at(at(12, 0, 0), 40);
        {
            let mut windows = limiter.lock();
            windows.token_reset = Some(at(13, 0, 0));
        }
        limiter.record_request_at(at(12, 30, 0), 2);
        assert_eq!(limiter.status_at(at(12, 30, 0)).tokens_today, 42);

        limiter.record_request_at(at(14, 0, 0), 5);
        let status = limiter.status_at(at(14, 0, 0));
        assert_eq!(status.tokens_today, 5);
        assert_eq!(status.token_reset_time, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
        assert_eq!(status.requests_this_minute, 1);
        assert_eq!(status.requests_today, 1);
        assert_eq!(status.requests_per_minute_limit, 10);
    }
}
