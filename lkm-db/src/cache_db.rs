//! Cache database connection pool and initialization.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

use crate::error::{DbError, DbResult};

/// Open a pool with the cache's connection pragmas applied to every connection.
pub(crate) async fn connect(options: SqliteConnectOptions, max_connections: u32) -> DbResult<SqlitePool> {
    let options = options
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .pragma("cache_size", "-16000");

    Ok(SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?)
}

/// In-process counters for cache effectiveness.
///
/// These live for the lifetime of the pool and are not persisted.
#[derive(Debug, Default)]
pub struct CacheCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    items_cached: AtomicU64,
    duplicates_prevented: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub items_cached: u64,
    pub duplicates_prevented: u64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cached(&self) {
        self.items_cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_prevented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            items_cached: self.items_cached.load(Ordering::Relaxed),
            duplicates_prevented: self.duplicates_prevented.load(Ordering::Relaxed),
        }
    }

    /// Hit rate in percent, `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let snapshot = self.snapshot();
        let lookups = snapshot.cache_hits + snapshot.cache_misses;
        if lookups == 0 {
            return 0.0;
        }
        snapshot.cache_hits as f64 / lookups as f64 * 100.0
    }
}

/// Cache database pool wrapper
#[derive(Debug, Clone)]
pub struct CacheDbPool {
    pool: SqlitePool,
    counters: Arc<CacheCounters>,
}

impl CacheDbPool {
    /// Open (or create) the cache database at `db_path` and run migrations.
    pub async fn open(db_path: &Path) -> DbResult<Self> {
        info!("Initializing cache database at: {}", db_path.display());

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = connect(options, 5).await?;

        Self::run_migrations(&pool).await?;

        info!("Cache database initialized successfully");
        Ok(Self::from_pool(pool))
    }

    /// Open the cache database at the configured `storage.cache_db_path`.
    pub async fn from_settings(settings: &lkm_core::Settings) -> DbResult<Self> {
        Self::open(&settings.storage.cache_db_path).await
    }

    /// Get the inner SQLx pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    /// Run database migrations using sqlx migrate macro
    pub(crate) async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
        sqlx::migrate!("./migrations/cache")
            .run(pool)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;

        info!("Cache database migrations completed");
        Ok(())
    }

    /// Close the pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Wrap an existing, already migrated SqlitePool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            counters: Arc::new(CacheCounters::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let counters = CacheCounters::default();
        assert_eq!(counters.hit_rate(), 0.0);

        counters.record_hit();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        assert_eq!(counters.hit_rate(), 75.0);
        assert_eq!(counters.snapshot().cache_misses, 1);
    }
}
