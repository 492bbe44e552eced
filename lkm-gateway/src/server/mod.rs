//! HTTP API under `/api/v1`.

pub mod error;
pub mod handlers;
pub mod middleware;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

pub use error::{ApiError, ApiResult};

/// Run the HTTP server until ctrl-c.
pub async fn run(state: Arc<AppState>, bind_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(Arc::clone(&state));
    let monitoring = state.metrics.is_enabled().then(|| {
        Arc::clone(&state.monitor).spawn(Duration::from_secs(
            state.settings.monitoring.health_check_interval_seconds,
        ))
    });

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(monitoring) = monitoring {
        monitoring.abort();
    }
    state.shutdown().await;
    info!("Server stopped");
    Ok(())
}

/// Create the router with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = middleware::cors_layer(&state.settings.cors_origins());

    let api = api_routes().route_layer(axum::middleware::from_fn_with_state(
        Arc::clone(&state),
        middleware::track_metrics,
    ));

    Router::new()
        .nest("/api/v1", api)
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::rate_limit,
        ))
        .layer(axum::middleware::from_fn(middleware::request_context))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/urls/add", post(handlers::add_url))
        .route("/urls/batch", post(handlers::add_urls))
        .route("/process/start", post(handlers::start_processing))
        .route("/process/stop", post(handlers::stop_processing))
        .route("/process/status", get(handlers::processing_status))
        .route("/queue/status", get(handlers::queue_status))
        .route("/tasks/completed", delete(handlers::clear_completed_tasks))
        .route(
            "/tasks/{id}",
            get(handlers::get_task).delete(handlers::cancel_task),
        )
        .route("/knowledge", get(handlers::list_knowledge))
        .route("/knowledge/search", get(handlers::search_knowledge))
        .route("/knowledge/{id}", get(handlers::get_knowledge))
        .route("/knowledge/{id}/related", get(handlers::related_knowledge))
        .route("/analytics/content", get(handlers::content_analytics))
        .route("/analytics/activity", get(handlers::activity_analytics))
        .route("/stats", get(handlers::system_stats))
        .route("/metrics", get(handlers::export_metrics))
        .route("/health/detailed", get(handlers::detailed_health))
        .route("/alerts", get(handlers::alert_history))
        .route("/export/{format}", get(handlers::export_knowledge))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
