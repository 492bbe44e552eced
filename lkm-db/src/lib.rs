//! lkm-db: SQLite cache for scraped LinkedIn posts and extracted knowledge.
//!
//! This crate provides:
//! - URL, content and knowledge caches keyed by stable hashes
//! - A persistent processing queue
//! - Full-text search, similarity links and topic clusters
//! - Housekeeping: statistics, cleanup, invalidation and JSON export

pub mod cache_db;
pub mod content;
pub mod enhanced;
pub mod error;
pub mod hashing;
pub mod knowledge;
pub mod maintenance;
pub mod queue;
pub mod urls;

pub use cache_db::{CacheCounters, CacheDbPool, CounterSnapshot};
pub use content::ContentCacheRepository;
pub use enhanced::{
    ContentAnalytics, EnhancedCache, OptimizeReport, RelatedItem, SearchHit, SimilarItem,
    TopicCluster,
};
pub use error::{DbError, DbResult};
pub use knowledge::{CachedKnowledge, KnowledgeCacheRepository};
pub use maintenance::{CacheMaintenance, CacheStatistics, CleanupReport, Invalidation};
pub use queue::{DEFAULT_QUEUE_PRIORITY, QueueEntry, QueueRepository};
pub use urls::{CachedUrl, ProcessingStatus, UrlCacheRepository};

// Re-export test helpers when running tests or when test-helpers feature is enabled
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
