//! File-backed knowledge repository with a searchable SQLite index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use lkm_core::{Category, KnowledgeItem};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::storage::RepositoryIndex;

pub const REPOSITORY_VERSION: &str = "1.0";
pub const REPOSITORY_JSON: &str = "knowledge_repository.json";
pub const REPOSITORY_DB: &str = "knowledge_repository.db";
const RECENT_ACTIVITY_DAYS: i64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

/// Derived statistics, refreshed on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub total_items: usize,
    pub categories: BTreeMap<String, usize>,
    pub date_range: DateRange,
    /// Item count per source domain.
    pub sources: BTreeMap<String, usize>,
    pub last_updated: DateTime<Utc>,
}

impl RepositoryMetadata {
    fn compute(items: &[KnowledgeItem]) -> Self {
        let mut categories = BTreeMap::new();
        let mut sources = BTreeMap::new();
        for item in items {
            *categories.entry(item.category.as_str().to_string()).or_default() += 1;
            *sources.entry(source_domain(&item.source_link)).or_default() += 1;
        }
        Self {
            total_items: items.len(),
            categories,
            date_range: DateRange {
                earliest: items.iter().map(|i| i.extraction_date).min(),
                latest: items.iter().map(|i| i.extraction_date).max(),
            },
            sources,
            last_updated: Utc::now(),
        }
    }
}

fn source_domain(link: &str) -> String {
    url::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// All knowledge items plus derived metadata. Serialized as the repository JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRepository {
    pub items: Vec<KnowledgeItem>,
    pub metadata: RepositoryMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: String,
}

impl Default for KnowledgeRepository {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl KnowledgeRepository {
    pub fn new(items: Vec<KnowledgeItem>) -> Self {
        let now = Utc::now();
        Self {
            metadata: RepositoryMetadata::compute(&items),
            items,
            created_at: now,
            updated_at: now,
            version: REPOSITORY_VERSION.to_string(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.metadata = RepositoryMetadata::compute(&self.items);
    }

    /// Add an item. Returns false when an item with the same source link exists.
    pub fn add_item(&mut self, item: KnowledgeItem) -> bool {
        if self.items.iter().any(|i| i.source_link == item.source_link) {
            warn!(source_link = %item.source_link, "Duplicate item skipped");
            return false;
        }
        info!(knowledge_id = %item.id, "Added knowledge item");
        self.items.push(item);
        self.touch();
        true
    }

    pub fn remove_item(&mut self, item_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != item_id);
        let removed = self.items.len() < before;
        if removed {
            self.touch();
            info!(knowledge_id = %item_id, "Removed knowledge item");
        }
        removed
    }

    pub fn get_item(&self, item_id: &str) -> Option<&KnowledgeItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn get_items_by_category(&self, category: Category) -> Vec<&KnowledgeItem> {
        self.items.iter().filter(|i| i.category == category).collect()
    }

    pub fn get_items_by_topic(&self, topic: &str) -> Vec<&KnowledgeItem> {
        let needle = topic.to_lowercase();
        self.items
            .iter()
            .filter(|i| i.topic.to_lowercase().contains(&needle))
            .collect()
    }

    /// Case-insensitive substring search over title, topic, content and notes.
    pub fn search_items(&self, query: &str) -> Vec<&KnowledgeItem> {
        let needle = query.to_lowercase();
        self.items
            .iter()
            .filter(|i| {
                [
                    &i.post_title,
                    &i.topic,
                    &i.key_knowledge_content,
                    &i.notes_applications,
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Newest extraction first.
    pub fn get_recent_items(&self, limit: usize) -> Vec<&KnowledgeItem> {
        let mut items: Vec<&KnowledgeItem> = self.items.iter().collect();
        items.sort_by(|a, b| b.extraction_date.cmp(&a.extraction_date));
        items.truncate(limit);
        items
    }

    pub fn to_json(&self) -> KnowledgeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse repository JSON. Metadata is recomputed from the items.
    pub fn from_json(json: &str) -> KnowledgeResult<Self> {
        let mut repository: Self = serde_json::from_str(json)?;
        repository.metadata = RepositoryMetadata::compute(&repository.items);
        Ok(repository)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryStatistics {
    pub total_items: i64,
    pub categories: BTreeMap<String, i64>,
    /// Items per extraction day over the last 30 days.
    pub recent_activity: BTreeMap<String, i64>,
    pub database_file: PathBuf,
    pub json_file: PathBuf,
}

/// Persists a [`KnowledgeRepository`] as JSON and mirrors it into the index.
#[derive(Debug, Clone)]
pub struct RepositoryManager {
    root: PathBuf,
    json_file: PathBuf,
    db_file: PathBuf,
    index: RepositoryIndex,
}

impl RepositoryManager {
    pub async fn open(root: impl AsRef<Path>) -> KnowledgeResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| KnowledgeError::storage(&root, "create_dir", e))?;
        let json_file = root.join(REPOSITORY_JSON);
        let db_file = root.join(REPOSITORY_DB);
        let index = RepositoryIndex::open(&db_file).await?;
        info!(path = %root.display(), "Repository manager initialized");
        Ok(Self {
            root,
            json_file,
            db_file,
            index,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn json_file(&self) -> &Path {
        &self.json_file
    }

    fn pool(&self) -> &SqlitePool {
        self.index.pool()
    }

    /// Write the JSON file, then upsert every item into the index and drop
    /// rows for items no longer present.
    pub async fn save_repository(&self, repository: &KnowledgeRepository) -> KnowledgeResult<()> {
        let json = repository.to_json()?;
        tokio::fs::write(&self.json_file, json)
            .await
            .map_err(|e| KnowledgeError::storage(&self.json_file, "save_repository", e))?;

        let mut tx = self.pool().begin().await?;
        let now = Utc::now().timestamp();
        for item in &repository.items {
            sqlx::query(
                "INSERT INTO knowledge_items
                    (id, topic, post_title, key_knowledge_content, infographic_summary,
                     source_link, notes_applications, extraction_date, category,
                     course_references, indexed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    topic = excluded.topic,
                    post_title = excluded.post_title,
                    key_knowledge_content = excluded.key_knowledge_content,
                    infographic_summary = excluded.infographic_summary,
                    source_link = excluded.source_link,
                    notes_applications = excluded.notes_applications,
                    extraction_date = excluded.extraction_date,
                    category = excluded.category,
                    course_references = excluded.course_references,
                    indexed_at = excluded.indexed_at",
            )
            .bind(&item.id)
            .bind(&item.topic)
            .bind(&item.post_title)
            .bind(&item.key_knowledge_content)
            .bind(&item.infographic_summary)
            .bind(&item.source_link)
            .bind(&item.notes_applications)
            .bind(index_date(item.extraction_date))
            .bind(item.category.as_str())
            .bind(serde_json::to_string(&item.course_references)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let ids: Vec<&str> = repository.items.iter().map(|i| i.id.as_str()).collect();
        sqlx::query("DELETE FROM knowledge_items WHERE id NOT IN (SELECT value FROM json_each(?))")
            .bind(serde_json::to_string(&ids)?)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM knowledge_search")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO knowledge_search
                (id, topic, post_title, key_knowledge_content, notes_applications)
             SELECT id, topic, post_title, key_knowledge_content, notes_applications
             FROM knowledge_items",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(items = repository.items.len(), "Repository saved");
        Ok(())
    }

    /// Load the JSON file, or an empty repository when none exists yet.
    pub async fn load_repository(&self) -> KnowledgeResult<KnowledgeRepository> {
        if !tokio::fs::try_exists(&self.json_file).await? {
            info!("Created new empty repository");
            return Ok(KnowledgeRepository::default());
        }
        let json = tokio::fs::read_to_string(&self.json_file)
            .await
            .map_err(|e| KnowledgeError::storage(&self.json_file, "load_repository", e))?;
        let repository = KnowledgeRepository::from_json(&json)?;
        info!(items = repository.items.len(), "Repository loaded");
        Ok(repository)
    }

    /// Full-text search over the index, ranked by bm25. Falls back to a LIKE
    /// scan when the FTS query fails or finds nothing.
    pub async fn search_database(
        &self,
        query: &str,
        category: Option<Category>,
        limit: i64,
    ) -> KnowledgeResult<Vec<KnowledgeItem>> {
        let category = category.map(Category::as_str);
        let fts = sqlx::query_as::<_, IndexRow>(
            "SELECT k.id, k.topic, k.post_title, k.key_knowledge_content, k.infographic_summary,
                    k.source_link, k.notes_applications, k.extraction_date, k.category,
                    k.course_references
             FROM knowledge_search s
             JOIN knowledge_items k ON k.id = s.id
             WHERE knowledge_search MATCH ? AND (? IS NULL OR k.category = ?)
             ORDER BY bm25(knowledge_search)
             LIMIT ?",
        )
        .bind(fts_query(query))
        .bind(category)
        .bind(category)
        .bind(limit)
        .fetch_all(self.pool())
        .await;

        let rows = match fts {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => self.like_search(query, category, limit).await?,
            Err(e) => {
                warn!(error = %e, "FTS search failed, falling back to LIKE");
                self.like_search(query, category, limit).await?
            }
        };
        rows.into_iter().map(IndexRow::into_item).collect()
    }

    async fn like_search(
        &self,
        query: &str,
        category: Option<&str>,
        limit: i64,
    ) -> KnowledgeResult<Vec<IndexRow>> {
        let pattern = format!("%{}%", query.trim());
        Ok(sqlx::query_as::<_, IndexRow>(
            "SELECT id, topic, post_title, key_knowledge_content, infographic_summary,
                    source_link, notes_applications, extraction_date, category,
                    course_references
             FROM knowledge_items
             WHERE (topic LIKE ?1 OR post_title LIKE ?1 OR key_knowledge_content LIKE ?1
                    OR notes_applications LIKE ?1)
               AND (?2 IS NULL OR category = ?2)
             ORDER BY extraction_date DESC
             LIMIT ?3",
        )
        .bind(pattern)
        .bind(category)
        .bind(limit)
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn get_statistics(&self) -> KnowledgeResult<RepositoryStatistics> {
        let total_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_items")
            .fetch_one(self.pool())
            .await?;

        let categories: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM knowledge_items GROUP BY category ORDER BY 2 DESC",
        )
        .fetch_all(self.pool())
        .await?;

        let cutoff = index_date(Utc::now() - Duration::days(RECENT_ACTIVITY_DAYS));
        let recent: Vec<(String, i64)> = sqlx::query_as(
            "SELECT substr(extraction_date, 1, 10) AS day, COUNT(*)
             FROM knowledge_items
             WHERE extraction_date >= ?
             GROUP BY day
             ORDER BY day DESC",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        Ok(RepositoryStatistics {
            total_items,
            categories: categories.into_iter().collect(),
            recent_activity: recent.into_iter().collect(),
            database_file: self.db_file.clone(),
            json_file: self.json_file.clone(),
        })
    }

    /// Copy the repository JSON to `target`, or to
    /// `backups/backup_{YYYYmmdd_HHMMSS}.json` under the repository root.
    pub async fn backup_repository(&self, target: Option<&Path>) -> KnowledgeResult<PathBuf> {
        if !tokio::fs::try_exists(&self.json_file).await? {
            return Err(KnowledgeError::storage(
                &self.json_file,
                "backup_repository",
                "No repository file to backup",
            ));
        }
        let target = match target {
            Some(path) => path.to_path_buf(),
            None => self.root.join("backups").join(format!(
                "backup_{}.json",
                Utc::now().format("%Y%m%d_%H%M%S")
            )),
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&self.json_file, &target)
            .await
            .map_err(|e| KnowledgeError::storage(&target, "backup_repository", e))?;
        info!(path = %target.display(), "Repository backed up");
        Ok(target)
    }

    /// Load a backup and make it the current repository.
    pub async fn restore_repository(&self, backup: &Path) -> KnowledgeResult<KnowledgeRepository> {
        if !tokio::fs::try_exists(backup).await? {
            return Err(KnowledgeError::BackupNotFound(backup.to_path_buf()));
        }
        let json = tokio::fs::read_to_string(backup).await?;
        let repository = KnowledgeRepository::from_json(&json)?;
        self.save_repository(&repository).await?;
        info!(path = %backup.display(), items = repository.items.len(), "Repository restored");
        Ok(repository)
    }

    pub async fn close(&self) {
        self.index.close().await;
    }
}

fn index_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Quote each token so user input cannot use FTS5 operators.
fn fts_query(raw: &str) -> String {
    let tokens: Vec<String> = raw
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect();
    if tokens.is_empty() {
        "\"\"".to_string()
    } else {
        tokens.join(" ")
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IndexRow {
    id: String,
    topic: String,
    post_title: String,
    key_knowledge_content: String,
    infographic_summary: String,
    source_link: String,
    notes_applications: String,
    extraction_date: String,
    category: String,
    course_references: String,
}

impl IndexRow {
    fn into_item(self) -> KnowledgeResult<KnowledgeItem> {
        let extraction_date = DateTime::parse_from_rfc3339(&self.extraction_date)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| {
                KnowledgeError::Core(lkm_core::CoreError::validation(
                    "extraction_date",
                    format!("{}: {e}", self.extraction_date),
                ))
            })?;
        Ok(KnowledgeItem {
            id: self.id,
            topic: self.topic,
            post_title: self.post_title,
            key_knowledge_content: self.key_knowledge_content,
            infographic_summary: self.infographic_summary,
            source_link: self.source_link,
            notes_applications: self.notes_applications,
            category: Category::from_string(&self.category),
            course_references: serde_json::from_str(&self.course_references)?,
            extraction_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(topic: &str, link: &str, category: Category) -> KnowledgeItem {
        KnowledgeItem::new(
            topic,
            format!("{topic} in practice"),
            format!("Notes about {topic}"),
            "",
            link,
            "Apply at the next planning session",
            category,
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_add_item_deduplicates_by_source_link() {
        let mut repository = KnowledgeRepository::default();
        let link = "https://www.linkedin.com/posts/acme_x-activity-1";
        assert!(repository.add_item(item("Pricing", link, Category::SaasBusiness)));
        assert!(!repository.add_item(item("Pricing again", link, Category::SaasBusiness)));
        assert_eq!(repository.items.len(), 1);
        assert_eq!(repository.metadata.total_items, 1);
        assert_eq!(repository.metadata.sources["www.linkedin.com"], 1);
    }

    #[test]
    fn test_queries() {
        let mut repository = KnowledgeRepository::default();
        repository.add_item(item("Pricing pages", "https://a.example/1", Category::SaasBusiness));
        repository.add_item(item("Team rituals", "https://b.example/2", Category::LeadershipManagement));

        assert_eq!(repository.get_items_by_category(Category::SaasBusiness).len(), 1);
        assert_eq!(repository.get_items_by_topic("PRICING").len(), 1);
        assert_eq!(repository.search_items("planning session").len(), 2);
        assert_eq!(repository.search_items("rituals").len(), 1);
        assert_eq!(repository.get_recent_items(1).len(), 1);
        assert_eq!(repository.metadata.categories["Leadership & Management"], 1);

        let id = repository.items[0].id.clone();
        assert!(repository.get_item(&id).is_some());
        assert!(repository.remove_item(&id));
        assert!(!repository.remove_item(&id));
        assert_eq!(repository.metadata.total_items, 1);
    }

    #[test]
    fn test_json_round_trip_recomputes_metadata() {
        let mut repository = KnowledgeRepository::default();
        repository.add_item(item("Pricing", "not a url", Category::SaasBusiness));
        let json = repository.to_json().unwrap();
        let restored = KnowledgeRepository::from_json(&json).unwrap();

        assert_eq!(restored.items, repository.items);
        assert_eq!(restored.version, REPOSITORY_VERSION);
        assert_eq!(restored.metadata.sources["unknown"], 1);
    }

    #[test]
    fn test_fts_query_quotes_tokens() {
        assert_eq!(fts_query("growth AND \"churn\""), "\"growth\" \"AND\" \"churn\"");
        assert_eq!(fts_query("   "), "\"\"");
    }
}
