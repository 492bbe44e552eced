//! URL cache: which LinkedIn URLs have been seen and how far they got.

use std::{fmt, str::FromStr};

use chrono::Utc;
use lkm_core::url_parser;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    cache_db::CacheDbPool,
    error::{DbError, DbResult},
    hashing::url_hash,
};

/// Processing state of a cached URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

/// URL cache record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedUrl {
    pub original_url: String,
    pub normalized_url: String,
    pub url_hash: String,
    pub post_type: Option<String>,
    pub post_id: Option<String>,
    pub author_id: Option<String>,
    pub first_seen: i64,
    pub last_accessed: i64,
    pub access_count: i64,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
    /// Knowledge item this URL resolved to, once processed
    pub knowledge_id: Option<String>,
}

/// URL cache repository
pub struct UrlCacheRepository;

impl UrlCacheRepository {
    /// Check whether a URL is known. A hit refreshes the access bookkeeping;
    /// hits and misses feed the pool counters.
    pub async fn is_cached(db: &CacheDbPool, url: &str) -> DbResult<bool> {
        let hash = url_hash(url);
        let found = sqlx::query_scalar::<_, i64>("SELECT id FROM url_cache WHERE url_hash = ?")
            .bind(&hash)
            .fetch_optional(db.pool())
            .await?;

        if found.is_some() {
            touch(db.pool(), &hash).await?;
            db.counters().record_hit();
            debug!(url_hash = %hash, "url cache hit");
            Ok(true)
        } else {
            db.counters().record_miss();
            debug!(url_hash = %hash, "url cache miss");
            Ok(false)
        }
    }

    /// Insert or refresh a URL entry and return its hash.
    ///
    /// Post type, id and author are taken from the parsed URL when it parses.
    /// Re-caching a known URL keeps its history and bumps `access_count`.
    pub async fn cache_url(
        db: &CacheDbPool,
        url: &str,
        metadata: Option<&serde_json::Value>,
    ) -> DbResult<String> {
        let hash = url_hash(url);
        let info = url_parser::parse_url(url).ok();
        let normalized = info
            .as_ref()
            .map(|i| i.normalized_url.clone())
            .unwrap_or_else(|| url.to_string());
        let metadata = metadata
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO url_cache
                (original_url, normalized_url, url_hash, post_type, post_id, author_id,
                 first_seen, last_accessed, access_count, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
             ON CONFLICT(url_hash) DO UPDATE SET
                original_url = excluded.original_url,
                last_accessed = excluded.last_accessed,
                access_count = url_cache.access_count + 1,
                metadata = excluded.metadata",
        )
        .bind(url)
        .bind(&normalized)
        .bind(&hash)
        .bind(info.as_ref().map(|i| i.post_type.to_string()))
        .bind(info.as_ref().map(|i| i.post_id.clone()))
        .bind(info.as_ref().and_then(|i| i.author_id.clone()))
        .bind(now)
        .bind(now)
        .bind(serde_json::to_string(&metadata)?)
        .execute(db.pool())
        .await?;

        db.counters().record_cached();
        debug!(url_hash = %hash, "url cached");
        Ok(hash)
    }

    /// Fetch the URL record, refreshing its access bookkeeping.
    pub async fn get(db: &CacheDbPool, url: &str) -> DbResult<Option<CachedUrl>> {
        let hash = url_hash(url);
        let row = sqlx::query_as::<_, UrlRow>(
            "SELECT original_url, normalized_url, url_hash, post_type, post_id, author_id,
                    first_seen, last_accessed, access_count, processing_status, error_message, metadata,
                    knowledge_id
             FROM url_cache
             WHERE url_hash = ?",
        )
        .bind(&hash)
        .fetch_optional(db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        touch(db.pool(), &hash).await?;

        let mut cached = CachedUrl::try_from(row)?;
        cached.access_count += 1;
        Ok(Some(cached))
    }

    pub async fn set_status(
        pool: &SqlitePool,
        url_hash: &str,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE url_cache SET processing_status = ?, error_message = ? WHERE url_hash = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(url_hash)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record which knowledge item a URL resolved to.
    pub async fn link_knowledge(pool: &SqlitePool, url_hash: &str, knowledge_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE url_cache SET knowledge_id = ? WHERE url_hash = ?")
            .bind(knowledge_id)
            .bind(url_hash)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn list_all(pool: &SqlitePool) -> DbResult<Vec<CachedUrl>> {
        let rows = sqlx::query_as::<_, UrlRow>(
            "SELECT original_url, normalized_url, url_hash, post_type, post_id, author_id,
                    first_seen, last_accessed, access_count, processing_status, error_message, metadata,
                    knowledge_id
             FROM url_cache
             ORDER BY first_seen ASC",
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(CachedUrl::try_from).collect()
    }
}

async fn touch(pool: &SqlitePool, url_hash: &str) -> DbResult<()> {
    sqlx::query(
        "UPDATE url_cache SET last_accessed = ?, access_count = access_count + 1 WHERE url_hash = ?",
    )
    .bind(Utc::now().timestamp())
    .bind(url_hash)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct UrlRow {
    original_url: String,
    normalized_url: String,
    url_hash: String,
    post_type: Option<String>,
    post_id: Option<String>,
    author_id: Option<String>,
    first_seen: i64,
    last_accessed: i64,
    access_count: i64,
    processing_status: String,
    error_message: Option<String>,
    metadata: String,
    knowledge_id: Option<String>,
}

impl TryFrom<UrlRow> for CachedUrl {
    type Error = DbError;

    fn try_from(row: UrlRow) -> Result<Self, Self::Error> {
        let processing_status = row
            .processing_status
            .parse()
            .map_err(|message| DbError::CorruptRow {
                table: "url_cache",
                message,
            })?;
        Ok(CachedUrl {
            original_url: row.original_url,
            normalized_url: row.normalized_url,
            url_hash: row.url_hash,
            post_type: row.post_type,
            post_id: row.post_id,
            author_id: row.author_id,
            first_seen: row.first_seen,
            last_accessed: row.last_accessed,
            access_count: row.access_count,
            processing_status,
            error_message: row.error_message,
            metadata: serde_json::from_str(&row.metadata)?,
            knowledge_id: row.knowledge_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::create_test_cache_pool;

    const URL: &str = "https://www.linkedin.com/feed/update/urn:li:activity:7123456789012345678";

    #[tokio::test]
    async fn test_cache_url_and_lookup() {
        let db = create_test_cache_pool().await.unwrap();

        assert!(!UrlCacheRepository::is_cached(&db, URL).await.unwrap());

        let hash = UrlCacheRepository::cache_url(&db, URL, None).await.unwrap();
        assert_eq!(hash.len(), 16);
        assert!(UrlCacheRepository::is_cached(&db, URL).await.unwrap());

        let counters = db.counters().snapshot();
        assert_eq!(counters.cache_hits, 1);
        assert_eq!(counters.cache_misses, 1);
        assert_eq!(counters.items_cached, 1);

        let cached = UrlCacheRepository::get(&db, URL).await.unwrap().unwrap();
        assert_eq!(cached.post_type.as_deref(), Some("activity"));
        assert_eq!(cached.post_id.as_deref(), Some("7123456789012345678"));
        assert_eq!(cached.processing_status, ProcessingStatus::Pending);
        // insert, is_cached hit, get
        assert_eq!(cached.access_count, 3);
    }

    #[tokio::test]
    async fn test_recache_keeps_first_seen() {
        let db = create_test_cache_pool().await.unwrap();
        UrlCacheRepository::cache_url(&db, URL, None).await.unwrap();
        let metadata = serde_json::json!({"source": "batch"});
        UrlCacheRepository::cache_url(&db, &format!("{URL}?trk=feed"), Some(&metadata))
            .await
            .unwrap();

        let all = UrlCacheRepository::list_all(db.pool()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].access_count, 2);
        assert_eq!(all[0].metadata["source"], "batch");
    }

    #[tokio::test]
    async fn test_set_status() {
        let db = create_test_cache_pool().await.unwrap();
        let hash = UrlCacheRepository::cache_url(&db, URL, None).await.unwrap();
        UrlCacheRepository::set_status(db.pool(), &hash, ProcessingStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let cached = UrlCacheRepository::get(&db, URL).await.unwrap().unwrap();
        assert_eq!(cached.processing_status, ProcessingStatus::Failed);
        assert_eq!(cached.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_link_knowledge() {
        let db = create_test_cache_pool().await.unwrap();
        let hash = UrlCacheRepository::cache_url(&db, URL, None).await.unwrap();
        assert!(UrlCacheRepository::get(&db, URL).await.unwrap().unwrap().knowledge_id.is_none());

        UrlCacheRepository::link_knowledge(db.pool(), &hash, "k-1").await.unwrap();
        let cached = UrlCacheRepository::get(&db, URL).await.unwrap().unwrap();
        assert_eq!(cached.knowledge_id.as_deref(), Some("k-1"));
    }
}
