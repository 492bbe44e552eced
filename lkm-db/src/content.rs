//! Cached raw post content, keyed by URL hash.

use chrono::{DateTime, Utc};
use lkm_core::{EngagementData, PostContent};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    cache_db::CacheDbPool,
    error::{DbError, DbResult},
    hashing::{content_hash, url_hash},
};

/// Content cache repository
pub struct ContentCacheRepository;

impl ContentCacheRepository {
    /// Store (or replace) the scraped content for `url`. Returns the content hash.
    pub async fn cache_post_content(
        db: &CacheDbPool,
        url: &str,
        post: &PostContent,
    ) -> DbResult<String> {
        let url_hash = url_hash(url);
        let content_hash = content_hash(post);
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO content_cache
                (url_hash, content_hash, post_url, post_title, post_author, post_date, body_text,
                 image_count, engagement_data, cached_at, last_accessed, access_count, content_size)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
             ON CONFLICT(url_hash) DO UPDATE SET
                content_hash = excluded.content_hash,
                post_url = excluded.post_url,
                post_title = excluded.post_title,
                post_author = excluded.post_author,
                post_date = excluded.post_date,
                body_text = excluded.body_text,
                image_count = excluded.image_count,
                engagement_data = excluded.engagement_data,
                cached_at = excluded.cached_at,
                last_accessed = excluded.last_accessed,
                content_size = excluded.content_size",
        )
        .bind(&url_hash)
        .bind(&content_hash)
        .bind(&post.url)
        .bind(&post.title)
        .bind(&post.author)
        .bind(post.post_date.map(|d| d.to_rfc3339()))
        .bind(&post.body_text)
        .bind(post.image_count() as i64)
        .bind(serde_json::to_string(&post.engagement_metrics)?)
        .bind(now)
        .bind(now)
        .bind(post.body_text.len() as i64)
        .execute(db.pool())
        .await?;

        db.counters().record_cached();
        debug!(content_hash = %content_hash, "post content cached");
        Ok(content_hash)
    }

    /// Rebuild the cached post for `url`. Images are not cached, so the result
    /// has none.
    pub async fn get_cached_post_content(
        db: &CacheDbPool,
        url: &str,
    ) -> DbResult<Option<PostContent>> {
        let url_hash = url_hash(url);
        let row = sqlx::query_as::<_, ContentRow>(
            "SELECT post_url, post_title, post_author, post_date, body_text, engagement_data
             FROM content_cache
             WHERE url_hash = ?",
        )
        .bind(&url_hash)
        .fetch_optional(db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE content_cache
             SET last_accessed = ?, access_count = access_count + 1
             WHERE url_hash = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(&url_hash)
        .execute(db.pool())
        .await?;

        Ok(Some(row.into_post()?))
    }

    pub async fn count(pool: &SqlitePool) -> DbResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM content_cache")
            .fetch_one(pool)
            .await?)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ContentRow {
    post_url: String,
    post_title: String,
    post_author: String,
    post_date: Option<String>,
    body_text: String,
    engagement_data: String,
}

impl ContentRow {
    fn into_post(self) -> DbResult<PostContent> {
        let post_date = self
            .post_date
            .map(|raw| parse_rfc3339("content_cache", &raw))
            .transpose()?;
        let engagement_metrics: EngagementData = serde_json::from_str(&self.engagement_data)?;
        Ok(PostContent {
            url: self.post_url,
            title: self.post_title,
            body_text: self.body_text,
            author: self.post_author,
            post_date,
            images: Vec::new(),
            engagement_metrics,
        })
    }
}

pub(crate) fn parse_rfc3339(table: &'static str, raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DbError::CorruptRow {
            table,
            message: format!("bad timestamp {raw:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::create_test_cache_pool;
    use chrono::TimeZone;
    use lkm_core::ImageData;

    fn sample_post() -> PostContent {
        PostContent {
            url: "https://www.linkedin.com/pulse/scaling-saas".to_string(),
            title: "Scaling SaaS".to_string(),
            body_text: "Pricing pages matter more than you think.".to_string(),
            author: "Jane Doe".to_string(),
            post_date: Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()),
            images: vec![ImageData::new("https://media.licdn.com/a.png", "a.png").unwrap()],
            engagement_metrics: EngagementData {
                likes: 10,
                comments: 2,
                shares: 1,
                reactions: 13,
            },
        }
    }

    #[tokio::test]
    async fn test_content_round_trip_drops_images() {
        let db = create_test_cache_pool().await.unwrap();
        let post = sample_post();

        let hash = ContentCacheRepository::cache_post_content(&db, &post.url, &post)
            .await
            .unwrap();
        assert_eq!(hash, content_hash(&post));

        let cached = ContentCacheRepository::get_cached_post_content(&db, &post.url)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.title, post.title);
        assert_eq!(cached.post_date, post.post_date);
        assert_eq!(cached.engagement_metrics, post.engagement_metrics);
        assert!(cached.images.is_empty());
    }

    #[tokio::test]
    async fn test_recaching_replaces_content() {
        let db = create_test_cache_pool().await.unwrap();
        let mut post = sample_post();
        ContentCacheRepository::cache_post_content(&db, &post.url, &post)
            .await
            .unwrap();
        post.body_text = "Updated body".to_string();
        ContentCacheRepository::cache_post_content(&db, &post.url, &post)
            .await
            .unwrap();

        assert_eq!(ContentCacheRepository::count(db.pool()).await.unwrap(), 1);
        let cached = ContentCacheRepository::get_cached_post_content(&db, &post.url)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body_text, "Updated body");
    }
}
