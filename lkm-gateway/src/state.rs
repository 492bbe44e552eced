use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lkm_core::Settings;
use lkm_db::CacheDbPool;
use lkm_knowledge::{ContentSanitizer, FileOrganizer, RepositoryManager};
use tracing::info;

use crate::batch::BatchProcessor;
use crate::errors::ProcessingResult;
use crate::metrics::MetricsCollector;
use crate::monitoring::HealthMonitor;
use crate::pipeline::{KnowledgePipeline, PostFetcher};
use crate::providers::Provider;
use crate::server::middleware::ApiRateLimiter;

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    /// SQLite cache of URLs, content and knowledge
    pub cache: CacheDbPool,
    /// JSON repository plus its search index
    pub repositories: RepositoryManager,
    pub organizer: Arc<FileOrganizer>,
    pub sanitizer: Arc<ContentSanitizer>,
    pub provider: Arc<dyn Provider>,
    pub pipeline: Arc<KnowledgePipeline>,
    pub batch: Arc<BatchProcessor>,
    /// Per-client request budget for the HTTP API
    pub api_limiter: ApiRateLimiter,
    pub metrics: Arc<MetricsCollector>,
    pub monitor: Arc<HealthMonitor>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Open storage under the configured paths and wire the pipeline.
    pub async fn build(
        settings: Settings,
        fetcher: Arc<dyn PostFetcher>,
        provider: Arc<dyn Provider>,
    ) -> ProcessingResult<Arc<Self>> {
        let repo_path = settings.storage.knowledge_repo_path.clone();
        let cache = CacheDbPool::from_settings(&settings).await?;
        let repositories = RepositoryManager::open(&repo_path).await?;
        let organizer = Arc::new(FileOrganizer::new(&repo_path)?);
        let sanitizer = Arc::new(ContentSanitizer::new(&settings.security));
        let metrics = Arc::new(MetricsCollector::new(
            settings.monitoring.enable_metrics_collection,
        ));

        let pipeline = Arc::new(
            KnowledgePipeline::new(
                fetcher,
                Arc::clone(&provider),
                &settings,
                cache.clone(),
                repositories.clone(),
                Arc::clone(&sanitizer),
            )
            .await?
            .with_organizer(Arc::clone(&organizer))
            .with_metrics(Arc::clone(&metrics)),
        );
        let batch = Arc::new(
            BatchProcessor::open(cache.clone(), pipeline.clone(), &repo_path)
                .await?
                .with_metrics(Arc::clone(&metrics)),
        );
        let monitor = Arc::new(HealthMonitor::new(Arc::clone(&metrics)));

        let api_limiter = ApiRateLimiter::new(
            settings.server.api_rate_limit_per_minute.saturating_mul(2),
            Duration::from_secs(60),
        );

        info!(
            repository = %repo_path.display(),
            model = provider.model(),
            "Application state ready"
        );

        Ok(Arc::new(Self {
            settings,
            cache,
            repositories,
            organizer,
            sanitizer,
            provider,
            pipeline,
            batch,
            api_limiter,
            metrics,
            monitor,
            started_at: Utc::now(),
        }))
    }

    /// Close database pools.
    pub async fn shutdown(&self) {
        self.batch.stop_processing();
        self.repositories.close().await;
        self.cache.close().await;
    }
}
