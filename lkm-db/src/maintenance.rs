//! Cache housekeeping: statistics, cleanup, invalidation and export.

use std::path::Path;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    cache_db::{CacheDbPool, CounterSnapshot},
    error::{DbError, DbResult},
    hashing::url_hash,
    knowledge::{KNOWLEDGE_COLUMNS, KnowledgeRow},
    urls::{CachedUrl, UrlCacheRepository},
};

/// Snapshot of cache contents and effectiveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    pub total_urls_cached: i64,
    pub total_content_cached: i64,
    pub total_knowledge_cached: i64,
    pub queue_pending: i64,
    pub queue_processing: i64,
    /// Percentage of URL lookups that hit
    pub cache_hit_rate: f64,
    pub database_size_mb: f64,
    pub last_updated: String,
}

/// Rows removed by [`CacheMaintenance::cleanup_old_cache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub urls_removed: u64,
    pub content_removed: u64,
    pub knowledge_removed: u64,
    pub queue_cleaned: u64,
}

/// What to drop in [`CacheMaintenance::invalidate`].
#[derive(Debug, Clone, Copy)]
pub enum Invalidation<'a> {
    /// Every row derived from this URL, across all cache tables
    Url(&'a str),
    /// Content and knowledge rows carrying this hash
    ContentHash(&'a str),
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct ContentExportRow {
    url_hash: String,
    content_hash: String,
    post_url: String,
    post_title: String,
    post_author: String,
    post_date: Option<String>,
    body_text: String,
    image_count: i64,
    engagement_data: String,
    cached_at: i64,
    last_accessed: i64,
    access_count: i64,
    content_size: i64,
}

#[derive(Debug, Serialize)]
struct CacheExport {
    export_date: String,
    statistics: CacheStatistics,
    url_cache: Vec<CachedUrl>,
    content_cache: Vec<ContentExportRow>,
    knowledge_cache: Vec<lkm_core::KnowledgeItem>,
}

pub struct CacheMaintenance;

impl CacheMaintenance {
    pub async fn statistics(db: &CacheDbPool) -> DbResult<CacheStatistics> {
        let pool = db.pool();
        let database_size: i64 = sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(pool)
        .await?;

        Ok(CacheStatistics {
            counters: db.counters().snapshot(),
            total_urls_cached: count(pool, "SELECT COUNT(*) FROM url_cache").await?,
            total_content_cached: count(pool, "SELECT COUNT(*) FROM content_cache").await?,
            total_knowledge_cached: count(pool, "SELECT COUNT(*) FROM knowledge_cache").await?,
            queue_pending: count(
                pool,
                "SELECT COUNT(*) FROM processing_queue WHERE status = 'queued'",
            )
            .await?,
            queue_processing: count(
                pool,
                "SELECT COUNT(*) FROM processing_queue WHERE status = 'processing'",
            )
            .await?,
            cache_hit_rate: db.counters().hit_rate(),
            database_size_mb: database_size as f64 / (1024.0 * 1024.0),
            last_updated: Utc::now().to_rfc3339(),
        })
    }

    /// Drop entries not touched for `days_to_keep` days, then VACUUM.
    ///
    /// Content read at least three times survives. URLs survive while a
    /// knowledge item references them or while they are pending/processing.
    pub async fn cleanup_old_cache(pool: &SqlitePool, days_to_keep: i64) -> DbResult<CleanupReport> {
        let cutoff = (Utc::now() - Duration::days(days_to_keep)).timestamp();
        let mut report = CleanupReport::default();

        report.queue_cleaned = sqlx::query(
            "DELETE FROM processing_queue
             WHERE status IN ('completed', 'failed') AND processing_completed < ?",
        )
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

        report.content_removed = sqlx::query(
            "DELETE FROM content_cache WHERE last_accessed < ? AND access_count < 3",
        )
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

        report.urls_removed = sqlx::query(
            "DELETE FROM url_cache
             WHERE last_accessed < ?
               AND url_hash NOT IN (SELECT DISTINCT url_hash FROM knowledge_cache)
               AND processing_status NOT IN ('pending', 'processing')",
        )
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

        sqlx::query("VACUUM").execute(pool).await?;

        info!(
            urls_removed = report.urls_removed,
            content_removed = report.content_removed,
            queue_cleaned = report.queue_cleaned,
            "cache cleanup completed"
        );
        Ok(report)
    }

    /// Remove cached rows. Returns the number of rows deleted.
    pub async fn invalidate(pool: &SqlitePool, target: Invalidation<'_>) -> DbResult<u64> {
        let mut removed = 0;
        match target {
            Invalidation::Url(url) => {
                if url.trim().is_empty() {
                    return Err(DbError::NothingToInvalidate);
                }
                let hash = url_hash(url);
                for table in [
                    "knowledge_cache",
                    "content_cache",
                    "processing_queue",
                    "url_cache",
                ] {
                    removed += sqlx::query(&format!("DELETE FROM {table} WHERE url_hash = ?"))
                        .bind(&hash)
                        .execute(pool)
                        .await?
                        .rows_affected();
                }
                info!(url, removed, "cache invalidated for url");
            }
            Invalidation::ContentHash(content_hash) => {
                if content_hash.trim().is_empty() {
                    return Err(DbError::NothingToInvalidate);
                }
                for table in ["knowledge_cache", "content_cache"] {
                    removed +=
                        sqlx::query(&format!("DELETE FROM {table} WHERE content_hash = ?"))
                            .bind(content_hash)
                            .execute(pool)
                            .await?
                            .rows_affected();
                }
                info!(content_hash, removed, "cache invalidated for content hash");
            }
        }
        Ok(removed)
    }

    /// Write statistics and every cache table to a JSON file.
    pub async fn export_cache_data(db: &CacheDbPool, output_path: &Path) -> DbResult<()> {
        let pool = db.pool();
        let content_cache = sqlx::query_as::<_, ContentExportRow>(
            "SELECT url_hash, content_hash, post_url, post_title, post_author, post_date,
                    body_text, image_count, engagement_data, cached_at, last_accessed,
                    access_count, content_size
             FROM content_cache
             ORDER BY cached_at ASC",
        )
        .fetch_all(pool)
        .await?;

        let knowledge_rows = sqlx::query_as::<_, KnowledgeRow>(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_cache ORDER BY cached_at ASC"
        ))
        .fetch_all(pool)
        .await?;

        let export = CacheExport {
            export_date: Utc::now().to_rfc3339(),
            statistics: Self::statistics(db).await?,
            url_cache: UrlCacheRepository::list_all(pool).await?,
            content_cache,
            knowledge_cache: knowledge_rows
                .into_iter()
                .map(KnowledgeRow::into_item)
                .collect::<DbResult<_>>()?,
        };

        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, serde_json::to_vec_pretty(&export)?).await?;
        info!(path = %output_path.display(), "cache data exported");
        Ok(())
    }
}

async fn count(pool: &SqlitePool, sql: &str) -> DbResult<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}
