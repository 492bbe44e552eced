//! Request middleware: correlation ids, timing, per-client rate limits, CORS.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{Any, CorsLayer};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use super::error::{ApiError, ErrorBody};
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Clients tracked before idle entries are swept.
const SWEEP_THRESHOLD: usize = 1024;

/// Sliding-window request counter keyed by client address.
#[derive(Debug)]
pub struct ApiRateLimiter {
    limit: u32,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl ApiRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Record a request from `client`. Returns `false` when over budget.
    pub fn check(&self, client: IpAddr) -> bool {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> bool {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if clients.len() > SWEEP_THRESHOLD {
            let window = self.window;
            clients.retain(|_, hits| hits.back().is_some_and(|&t| now.duration_since(t) < window));
        }

        let hits = clients.entry(client).or_default();
        while hits
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.window)
        {
            hits.pop_front();
        }
        if hits.len() >= self.limit as usize {
            return false;
        }
        hits.push_back(now);
        true
    }
}

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(&request);
    if !state.api_limiter.check(client) {
        warn!(%client, path = %request.uri().path(), "Rate limit exceeded");
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}

/// Tag the request with a short id, time it, and finish error envelopes.
pub async fn request_context(request: Request, next: Next) -> Response {
    let mut request_id = Uuid::new_v4().simple().to_string();
    request_id.truncate(8);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = info_span!("request", request_id = %request_id, %method, %path);

    let started = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    if let Some(body) = response.extensions_mut().remove::<ErrorBody>() {
        response = body.with_path(&path);
    }
    let elapsed = started.elapsed();

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{:.4}", elapsed.as_secs_f64())) {
        headers.insert(PROCESS_TIME_HEADER, value);
    }

    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        )
    });
    response
}

/// Count the response under its route template, so `/tasks/{id}` is one
/// endpoint however many ids are requested.
pub async fn track_metrics(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |p| p.as_str().to_string());

    let started = Instant::now();
    let response = next.run(request).await;
    state.metrics.record_request(
        &method,
        &endpoint,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

/// `*` or an empty list allows every origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_blocks_after_budget() {
        let limiter = ApiRateLimiter::new(2, Duration::from_secs(60));
        let client = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let now = Instant::now();

        assert!(limiter.check_at(client, now));
        assert!(limiter.check_at(client, now));
        assert!(!limiter.check_at(client, now));
        assert!(limiter.check_at(other, now));
    }

    #[test]
    fn test_limiter_window_slides() {
        let limiter = ApiRateLimiter::new(1, Duration::from_secs(60));
        let client = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let start = Instant::now();

        assert!(limiter.check_at(client, start));
        assert!(!limiter.check_at(client, start + Duration::from_secs(59)));
        assert!(limiter.check_at(client, start + Duration::from_secs(60)));
    }
}
