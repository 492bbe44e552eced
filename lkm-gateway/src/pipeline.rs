//! End-to-end processing of one LinkedIn URL.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::join_all;
use lkm_core::config::SecuritySettings;
use lkm_core::{Category, ImageData, KnowledgeItem, PostContent, Settings, url_parser};
use lkm_db::{CacheDbPool, EnhancedCache, KnowledgeCacheRepository, ProcessingStatus, UrlCacheRepository};
use lkm_knowledge::{
    ContentSanitizer, FileOrganizer, KnowledgeRepository, KnowledgeResult, LinkedInScraper,
    RepositoryManager,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::batch::{ProcessingTask, TaskExecutor};
use crate::categorizer::CategorizationService;
use crate::errors::{ProcessingError, ProcessingResult};
use crate::metrics::{CacheOutcome, MetricsCollector};
use crate::processor::ContentProcessor;
use crate::providers::Provider;
use crate::retry::{Classify, ErrorHandler};

/// Source of post pages and their images.
#[async_trait::async_trait]
pub trait PostFetcher: Send + Sync {
    async fn fetch_post(&self, url: &str) -> KnowledgeResult<PostContent>;

    /// Save `image` to `save_path`. Returns `Ok(false)` when nothing was written.
    async fn download_image(&self, _image: &mut ImageData, _save_path: &Path) -> KnowledgeResult<bool> {
        Ok(false)
    }
}

#[async_trait::async_trait]
impl PostFetcher for LinkedInScraper {
    async fn fetch_post(&self, url: &str) -> KnowledgeResult<PostContent> {
        self.scrape_post(url).await
    }

    async fn download_image(&self, image: &mut ImageData, save_path: &Path) -> KnowledgeResult<bool> {
        LinkedInScraper::download_image(self, image, save_path).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// The URL already had knowledge in the cache.
    Skipped { item_id: String },
    Processed { item_id: String, is_new: bool },
}

impl PipelineOutcome {
    pub fn item_id(&self) -> &str {
        match self {
            PipelineOutcome::Skipped { item_id } | PipelineOutcome::Processed { item_id, .. } => {
                item_id
            }
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, PipelineOutcome::Processed { is_new: true, .. })
    }
}

pub struct KnowledgePipeline {
    fetcher: Arc<dyn PostFetcher>,
    processor: ContentProcessor,
    categorizer: CategorizationService,
    sanitizer: Arc<ContentSanitizer>,
    security: SecuritySettings,
    cache: CacheDbPool,
    repositories: RepositoryManager,
    repository: tokio::sync::Mutex<KnowledgeRepository>,
    organizer: Option<Arc<FileOrganizer>>,
    errors: ErrorHandler,
    stats: Mutex<PipelineStats>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl KnowledgePipeline {
    /// Build the pipeline and load the saved repository.
    pub async fn new(
        fetcher: Arc<dyn PostFetcher>,
        provider: Arc<dyn Provider>,
        settings: &Settings,
        cache: CacheDbPool,
        repositories: RepositoryManager,
        sanitizer: Arc<ContentSanitizer>,
    ) -> ProcessingResult<Self> {
        let repository = repositories.load_repository().await?;
        info!(items = repository.items.len(), "Knowledge pipeline ready");

        Ok(Self {
            fetcher,
            processor: ContentProcessor::new(Arc::clone(&provider), settings),
            categorizer: CategorizationService::new(provider),
            sanitizer,
            security: settings.security.clone(),
            cache,
            repositories,
            repository: tokio::sync::Mutex::new(repository),
            organizer: None,
            errors: ErrorHandler::new(),
            stats: Mutex::new(PipelineStats::default()),
            metrics: None,
        })
    }

    /// Download post images into the organizer's infographics folder.
    pub fn with_organizer(mut self, organizer: Arc<FileOrganizer>) -> Self {
        self.organizer = Some(organizer);
        self
    }

    /// Count cache lookups, PII hits and stored items in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_error_handler(mut self, errors: ErrorHandler) -> Self {
        self.errors = errors;
        self
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn processor(&self) -> &ContentProcessor {
        &self.processor
    }

    /// A copy of the in-memory repository.
    pub async fn repository_snapshot(&self) -> KnowledgeRepository {
        self.repository.lock().await.clone()
    }

    /// Scrape, extract and store one URL.
    ///
    /// URLs whose knowledge is already cached are skipped. The URL cache
    /// status follows the run: processing, then completed or failed.
    pub async fn process_url(&self, url: &str) -> ProcessingResult<PipelineOutcome> {
        let started = Instant::now();
        self.update_stats(|s| s.total_processed += 1);
        url_parser::parse_url(url).map_err(|_| ProcessingError::InvalidUrl(url.to_string()))?;

        if UrlCacheRepository::is_cached(&self.cache, url).await?
            && let Some(existing) = KnowledgeCacheRepository::get_for_url(&self.cache, url).await?
        {
            info!(url, knowledge_id = %existing.id, "URL already processed, skipping");
            let item_id = existing.id.clone();
            self.ensure_in_repository(existing).await?;
            self.update_stats(|s| s.skipped += 1);
            self.with_collector(|m| m.record_cache_operation(CacheOutcome::Hit));
            return Ok(PipelineOutcome::Skipped { item_id });
        }

        self.with_collector(|m| m.record_cache_operation(CacheOutcome::Miss));
        let hash = UrlCacheRepository::cache_url(&self.cache, url, None).await?;
        UrlCacheRepository::set_status(self.cache.pool(), &hash, ProcessingStatus::Processing, None)
            .await?;

        match self.run(url, started).await {
            Ok(outcome) => {
                UrlCacheRepository::set_status(
                    self.cache.pool(),
                    &hash,
                    ProcessingStatus::Completed,
                    None,
                )
                .await?;
                self.update_stats(|s| s.successful += 1);
                self.with_collector(|m| m.record_knowledge_item_processed());
                info!(
                    url,
                    knowledge_id = outcome.item_id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "URL processed"
                );
                Ok(outcome)
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(status_err) = UrlCacheRepository::set_status(
                    self.cache.pool(),
                    &hash,
                    ProcessingStatus::Failed,
                    Some(&message),
                )
                .await
                {
                    warn!(url, error = %status_err, "Could not mark URL as failed");
                }
                self.errors
                    .record_error(e.error_kind(), &message, json!({ "url": url }), 0);
                self.update_stats(|s| s.failed += 1);
                error!(url, error = %message, "URL processing failed");
                Err(e)
            }
        }
    }

    async fn run(&self, url: &str, started: Instant) -> ProcessingResult<PipelineOutcome> {
        let mut post = self.fetcher.fetch_post(url).await?;

        if self.security.sanitize_content {
            let (title, title_report) = self.sanitizer.sanitize_content(&post.title, "post_title");
            let (body, report) = self.sanitizer.sanitize_content(&post.body_text, "post_body");
            self.with_collector(|m| {
                m.record_pii_detection(title_report.match_count + report.match_count)
            });
            if report.sanitized {
                debug!(url, replaced = report.replacements_made, "Sanitized post body");
            }
            post.title = title;
            post.body_text = body;
        }

        let mut item = self.processor.process_post_content(&post).await?;
        if item.category == Category::Other {
            match self.categorizer.categorize(&item.key_knowledge_content).await {
                Ok(refined) if refined.category != Category::Other => {
                    debug!(category = %refined.category, confidence = refined.confidence, "Category refined");
                    item.category = refined.category;
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Category refinement skipped"),
            }
        }
        if self.security.sanitize_content {
            let (clean, report) = self.sanitizer.sanitize_knowledge_item(&item);
            self.with_collector(|m| m.record_pii_detection(report.match_count));
            item = clean;
        }
        item.validate()?;

        self.store_images(&mut post, &item).await;

        let cached = EnhancedCache::cache_knowledge_item_enhanced(
            &self.cache,
            &item,
            Some(&post),
            started.elapsed().as_millis() as i64,
        )
        .await?;
        if !cached.is_new {
            debug!(url, existing = %cached.knowledge_id, "Knowledge already stored under another item");
        }
        item.id = cached.knowledge_id.clone();
        self.ensure_in_repository(item).await?;

        Ok(PipelineOutcome::Processed {
            item_id: cached.knowledge_id,
            is_new: cached.is_new,
        })
    }

    /// Add `item` to the repository and save it, unless its id is already
    /// there. Duplicates of stored knowledge resolve to the stored id and are
    /// left out.
    async fn ensure_in_repository(&self, item: KnowledgeItem) -> ProcessingResult<()> {
        let mut repository = self.repository.lock().await;
        if repository.get_item(&item.id).is_some() {
            return Ok(());
        }
        let knowledge_id = item.id.clone();
        if !repository.add_item(item) {
            return Ok(());
        }
        let snapshot: &KnowledgeRepository = &repository;
        self.errors
            .execute_with_retry(
                json!({ "operation": "save_repository", "knowledge_id": knowledge_id }),
                || self.repositories.save_repository(snapshot),
            )
            .await?;
        Ok(())
    }

    /// Best effort: failed downloads are logged and skipped.
    async fn store_images(&self, post: &mut PostContent, item: &KnowledgeItem) {
        let Some(organizer) = &self.organizer else {
            return;
        };
        if post.images.is_empty() {
            return;
        }

        let downloads = post.images.iter_mut().map(|image| {
            let target = organizer.infographic_path(image, item, true);
            async move {
                match self.fetcher.download_image(image, &target).await {
                    Ok(saved) => saved,
                    Err(e) => {
                        warn!(image = %image.url, error = %e, "Image download failed");
                        false
                    }
                }
            }
        });
        let saved = join_all(downloads).await.into_iter().filter(|ok| *ok).count();
        debug!(knowledge_id = %item.id, saved, "Stored post images");
    }

    fn with_collector(&self, f: impl FnOnce(&MetricsCollector)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut PipelineStats)) {
        f(&mut self.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }
}

#[async_trait::async_trait]
impl TaskExecutor for KnowledgePipeline {
    async fn execute(&self, task: &ProcessingTask) -> ProcessingResult<Value> {
        let outcome = self.process_url(&task.url).await?;
        Ok(json!({
            "knowledge_item_id": outcome.item_id(),
            "is_new": outcome.is_new(),
            "from_cache": matches!(outcome, PipelineOutcome::Skipped { .. }),
        }))
    }
}
