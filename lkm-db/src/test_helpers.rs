//! Test helpers for the cache database.

use std::sync::atomic::{AtomicU64, Ordering};

use lkm_core::{Category, KnowledgeItem};

use sqlx::sqlite::SqliteConnectOptions;

use crate::{
    cache_db::{CacheDbPool, connect},
    error::{DbError, DbResult},
};

static NEXT_ACTIVITY_ID: AtomicU64 = AtomicU64::new(1);

/// Create an in-memory cache database for testing.
///
/// A single connection, since every `:memory:` connection is its own database.
pub async fn create_test_cache_pool() -> DbResult<CacheDbPool> {
    let pool = connect(SqliteConnectOptions::new().filename(":memory:"), 1).await?;

    sqlx::migrate!("./migrations/cache")
        .run(&pool)
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

    Ok(CacheDbPool::from_pool(pool))
}

/// An AI & Machine Learning item with a unique activity URL.
pub fn sample_knowledge_item(topic: &str, content: &str) -> KnowledgeItem {
    let activity = NEXT_ACTIVITY_ID.fetch_add(1, Ordering::Relaxed);
    KnowledgeItem::new(
        topic,
        format!("{topic} notes"),
        content,
        "",
        format!("https://www.linkedin.com/feed/update/urn:li:activity:{activity}"),
        "Try it on the next project",
        Category::AiMachineLearning,
        vec!["Coursera Machine Learning".to_string()],
    )
    .expect("sample knowledge item is valid")
}
