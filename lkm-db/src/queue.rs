//! Persistent processing queue backed by `processing_queue`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    cache_db::CacheDbPool,
    error::DbResult,
    hashing::url_hash,
    urls::{ProcessingStatus, UrlCacheRepository},
};

pub const DEFAULT_QUEUE_PRIORITY: i64 = 5;

/// A queue entry handed out by [`QueueRepository::next`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: i64,
    pub url_hash: String,
    pub priority: i64,
    pub added_at: i64,
    pub retry_count: i64,
    pub original_url: String,
    pub normalized_url: String,
}

/// Processing queue repository
pub struct QueueRepository;

impl QueueRepository {
    /// Queue a URL. Returns `false` when it is already queued or processing.
    pub async fn add(db: &CacheDbPool, url: &str, priority: i64) -> DbResult<bool> {
        let hash = url_hash(url);

        let active = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM processing_queue
             WHERE url_hash = ? AND status IN ('queued', 'processing')",
        )
        .bind(&hash)
        .fetch_optional(db.pool())
        .await?;

        if active.is_some() {
            debug!(url_hash = %hash, "url already queued");
            return Ok(false);
        }

        let known = sqlx::query_scalar::<_, i64>("SELECT id FROM url_cache WHERE url_hash = ?")
            .bind(&hash)
            .fetch_optional(db.pool())
            .await?;
        if known.is_none() {
            UrlCacheRepository::cache_url(db, url, None).await?;
        }

        sqlx::query("INSERT INTO processing_queue (url_hash, priority, added_at) VALUES (?, ?, ?)")
            .bind(&hash)
            .bind(priority)
            .bind(Utc::now().timestamp())
            .execute(db.pool())
            .await?;

        debug!(url_hash = %hash, priority, "url queued");
        Ok(true)
    }

    /// Claim the highest-priority queued entry, oldest first, and mark it
    /// processing.
    pub async fn next(pool: &SqlitePool) -> DbResult<Option<QueueEntry>> {
        let entry = sqlx::query_as::<_, QueueEntry>(
            "SELECT pq.id, pq.url_hash, pq.priority, pq.added_at, pq.retry_count,
                    uc.original_url, uc.normalized_url
             FROM processing_queue pq
             JOIN url_cache uc ON pq.url_hash = uc.url_hash
             WHERE pq.status = 'queued'
             ORDER BY pq.priority DESC, pq.added_at ASC, pq.id ASC
             LIMIT 1",
        )
        .fetch_optional(pool)
        .await?;

        if let Some(entry) = &entry {
            sqlx::query(
                "UPDATE processing_queue SET status = 'processing', processing_started = ? WHERE id = ?",
            )
            .bind(Utc::now().timestamp())
            .bind(entry.id)
            .execute(pool)
            .await?;
            UrlCacheRepository::set_status(pool, &entry.url_hash, ProcessingStatus::Processing, None)
                .await?;
        }

        Ok(entry)
    }

    /// Finish the in-flight entry for `url_hash` and mirror the outcome onto
    /// the URL cache.
    pub async fn mark_complete(
        pool: &SqlitePool,
        url_hash: &str,
        success: bool,
        error_message: Option<&str>,
    ) -> DbResult<()> {
        let status = if success {
            ProcessingStatus::Completed
        } else {
            ProcessingStatus::Failed
        };

        sqlx::query(
            "UPDATE processing_queue
             SET status = ?, processing_completed = ?, error_message = ?
             WHERE url_hash = ? AND status = 'processing'",
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(error_message)
        .bind(url_hash)
        .execute(pool)
        .await?;

        UrlCacheRepository::set_status(pool, url_hash, status, error_message).await?;
        debug!(url_hash, %status, "queue entry finished");
        Ok(())
    }

    pub async fn count_by_status(pool: &SqlitePool, status: &str) -> DbResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM processing_queue WHERE status = ?")
                .bind(status)
                .fetch_one(pool)
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::create_test_cache_pool;

    const LOW: &str = "https://www.linkedin.com/feed/update/urn:li:activity:1";
    const HIGH: &str = "https://www.linkedin.com/feed/update/urn:li:activity:2";

    #[tokio::test]
    async fn test_queue_orders_by_priority() {
        let db = create_test_cache_pool().await.unwrap();
        assert!(QueueRepository::add(&db, LOW, 1).await.unwrap());
        assert!(QueueRepository::add(&db, HIGH, 8).await.unwrap());
        assert!(!QueueRepository::add(&db, HIGH, 8).await.unwrap());

        let first = QueueRepository::next(db.pool()).await.unwrap().unwrap();
        assert_eq!(first.normalized_url, HIGH);
        let second = QueueRepository::next(db.pool()).await.unwrap().unwrap();
        assert_eq!(second.normalized_url, LOW);
        assert!(QueueRepository::next(db.pool()).await.unwrap().is_none());
        assert_eq!(
            QueueRepository::count_by_status(db.pool(), "processing")
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_mark_complete_updates_url_status() {
        let db = create_test_cache_pool().await.unwrap();
        QueueRepository::add(&db, LOW, DEFAULT_QUEUE_PRIORITY)
            .await
            .unwrap();
        let entry = QueueRepository::next(db.pool()).await.unwrap().unwrap();

        QueueRepository::mark_complete(db.pool(), &entry.url_hash, false, Some("timeout"))
            .await
            .unwrap();

        let cached = UrlCacheRepository::get(&db, LOW).await.unwrap().unwrap();
        assert_eq!(cached.processing_status, ProcessingStatus::Failed);
        assert_eq!(cached.error_message.as_deref(), Some("timeout"));

        // A finished URL can be queued again.
        assert!(QueueRepository::add(&db, LOW, 5).await.unwrap());
    }
}
