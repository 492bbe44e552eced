//! Cached knowledge items with content-hash deduplication.

use chrono::Utc;
use lkm_core::{Category, KnowledgeItem};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::{
    cache_db::CacheDbPool,
    content::parse_rfc3339,
    error::DbResult,
    hashing::{knowledge_hash, url_hash},
};

/// Outcome of storing a knowledge item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedKnowledge {
    /// Id of the row now holding this knowledge. Differs from the item id when
    /// an identical item was already cached.
    pub knowledge_id: String,
    pub is_new: bool,
}

/// Knowledge cache repository
pub struct KnowledgeCacheRepository;

impl KnowledgeCacheRepository {
    /// Store a knowledge item unless one with the same knowledge hash exists.
    pub async fn cache_knowledge_item(
        db: &CacheDbPool,
        item: &KnowledgeItem,
        processing_time_ms: i64,
    ) -> DbResult<CachedKnowledge> {
        let hash = knowledge_hash(item);

        let existing = sqlx::query_scalar::<_, String>(
            "SELECT knowledge_id FROM knowledge_cache WHERE content_hash = ?",
        )
        .bind(&hash)
        .fetch_optional(db.pool())
        .await?;

        if let Some(knowledge_id) = existing {
            db.counters().record_duplicate();
            info!(content_hash = %hash, knowledge_id = %knowledge_id, "duplicate knowledge content");
            return Ok(CachedKnowledge {
                knowledge_id,
                is_new: false,
            });
        }

        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO knowledge_cache
                (knowledge_id, url_hash, content_hash, topic, post_title, category,
                 key_knowledge_content, infographic_summary, notes_applications,
                 course_references, source_link, extraction_date, cached_at, last_accessed,
                 processing_time_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(knowledge_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                topic = excluded.topic,
                post_title = excluded.post_title,
                category = excluded.category,
                key_knowledge_content = excluded.key_knowledge_content,
                infographic_summary = excluded.infographic_summary,
                notes_applications = excluded.notes_applications,
                course_references = excluded.course_references,
                last_accessed = excluded.last_accessed,
                processing_time_ms = excluded.processing_time_ms",
        )
        .bind(&item.id)
        .bind(url_hash(&item.source_link))
        .bind(&hash)
        .bind(&item.topic)
        .bind(&item.post_title)
        .bind(item.category.as_str())
        .bind(&item.key_knowledge_content)
        .bind(&item.infographic_summary)
        .bind(&item.notes_applications)
        .bind(serde_json::to_string(&item.course_references)?)
        .bind(&item.source_link)
        .bind(item.extraction_date.to_rfc3339())
        .bind(now)
        .bind(now)
        .bind(processing_time_ms)
        .execute(db.pool())
        .await?;

        db.counters().record_cached();
        debug!(knowledge_id = %item.id, "knowledge item cached");
        Ok(CachedKnowledge {
            knowledge_id: item.id.clone(),
            is_new: true,
        })
    }

    /// The knowledge item extracted from `url`, if any.
    pub async fn get_by_url(db: &CacheDbPool, url: &str) -> DbResult<Option<KnowledgeItem>> {
        let hash = url_hash(url);
        let row = sqlx::query_as::<_, KnowledgeRow>(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_cache WHERE url_hash = ? LIMIT 1"
        ))
        .bind(&hash)
        .fetch_optional(db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query("UPDATE knowledge_cache SET last_accessed = ? WHERE url_hash = ?")
            .bind(Utc::now().timestamp())
            .bind(&hash)
            .execute(db.pool())
            .await?;

        Ok(Some(row.into_item()?))
    }

    /// Knowledge for `url`: its own row, or the item it was linked to as a
    /// near-duplicate.
    pub async fn get_for_url(db: &CacheDbPool, url: &str) -> DbResult<Option<KnowledgeItem>> {
        if let Some(item) = Self::get_by_url(db, url).await? {
            return Ok(Some(item));
        }
        let linked = sqlx::query_scalar::<_, Option<String>>(
            "SELECT knowledge_id FROM url_cache WHERE url_hash = ?",
        )
        .bind(url_hash(url))
        .fetch_optional(db.pool())
        .await?
        .flatten();

        match linked {
            Some(knowledge_id) => Self::get_by_id(db.pool(), &knowledge_id).await,
            None => Ok(None),
        }
    }

    pub async fn get_by_id(pool: &SqlitePool, knowledge_id: &str) -> DbResult<Option<KnowledgeItem>> {
        let row = sqlx::query_as::<_, KnowledgeRow>(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_cache WHERE knowledge_id = ?"
        ))
        .bind(knowledge_id)
        .fetch_optional(pool)
        .await?;

        row.map(KnowledgeRow::into_item).transpose()
    }

    /// Page through cached items, newest first.
    pub async fn list(
        pool: &SqlitePool,
        category: Option<Category>,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<KnowledgeItem>> {
        let rows = match category {
            Some(category) => {
                sqlx::query_as::<_, KnowledgeRow>(&format!(
                    "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_cache
                     WHERE category = ?
                     ORDER BY cached_at DESC, id DESC
                     LIMIT ? OFFSET ?"
                ))
                .bind(category.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, KnowledgeRow>(&format!(
                    "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_cache
                     ORDER BY cached_at DESC, id DESC
                     LIMIT ? OFFSET ?"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
            }
        };

        rows.into_iter().map(KnowledgeRow::into_item).collect()
    }

    pub async fn count(pool: &SqlitePool, category: Option<Category>) -> DbResult<i64> {
        let count = match category {
            Some(category) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_cache WHERE category = ?")
                    .bind(category.as_str())
                    .fetch_one(pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_cache")
                    .fetch_one(pool)
                    .await?
            }
        };
        Ok(count)
    }
}

pub(crate) const KNOWLEDGE_COLUMNS: &str = "knowledge_id, topic, post_title, category, \
     key_knowledge_content, infographic_summary, notes_applications, course_references, \
     source_link, extraction_date";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct KnowledgeRow {
    knowledge_id: String,
    topic: String,
    post_title: String,
    category: String,
    key_knowledge_content: String,
    infographic_summary: String,
    notes_applications: String,
    course_references: String,
    source_link: String,
    extraction_date: String,
}

impl KnowledgeRow {
    pub(crate) fn into_item(self) -> DbResult<KnowledgeItem> {
        Ok(KnowledgeItem {
            id: self.knowledge_id,
            topic: self.topic,
            post_title: self.post_title,
            key_knowledge_content: self.key_knowledge_content,
            infographic_summary: self.infographic_summary,
            source_link: self.source_link,
            notes_applications: self.notes_applications,
            category: Category::from_string(&self.category),
            course_references: serde_json::from_str(&self.course_references)?,
            extraction_date: parse_rfc3339("knowledge_cache", &self.extraction_date)?,
        })
    }
}
