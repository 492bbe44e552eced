//! Search, similarity and clustering on top of the knowledge cache.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Duration, Utc};
use lkm_core::{Category, KnowledgeItem, PostContent};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::{
    cache_db::CacheDbPool,
    content::ContentCacheRepository,
    error::DbResult,
    hashing::url_hash,
    knowledge::{CachedKnowledge, KnowledgeCacheRepository},
    urls::UrlCacheRepository,
};

/// Score at or above which two items count as the same knowledge.
pub const DUPLICATE_THRESHOLD: f64 = 0.8;
/// Links below this score are not kept.
pub const RELATED_FLOOR: f64 = 0.5;
const MAX_SIMILARITY_CANDIDATES: i64 = 20;
const MAX_CLUSTER_KEYWORDS: usize = 10;

const STOP_WORDS: &[&str] = &[
    "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is", "are",
    "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "may", "might", "can", "this", "that", "these", "those",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarItem {
    pub knowledge_id: String,
    pub topic: String,
    pub category: String,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub knowledge_id: String,
    pub topic: String,
    pub post_title: String,
    pub category: String,
    pub key_knowledge_content: String,
    pub notes_applications: String,
    pub course_references: Vec<String>,
    pub extraction_date: String,
    /// bm25 rank for full-text hits (lower is better), 0 for LIKE hits
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RelatedItem {
    pub related_id: String,
    pub topic: String,
    pub category: String,
    pub key_knowledge_content: String,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCluster {
    pub cluster_name: String,
    pub topic_keywords: Vec<String>,
    pub knowledge_ids: Vec<String>,
    pub cluster_size: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityStats {
    pub total_similarities: i64,
    pub avg_similarity: f64,
    pub max_similarity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub total_clusters: i64,
    pub avg_cluster_size: f64,
    pub max_cluster_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalytics {
    pub category_distribution: BTreeMap<String, i64>,
    pub top_topics: Vec<TopicCount>,
    pub similarity_stats: SimilarityStats,
    pub cluster_stats: ClusterStats,
    /// Items cached per day (`YYYY-MM-DD`) over the last 7 days
    pub recent_activity: BTreeMap<String, i64>,
    pub generated_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeReport {
    pub similarities_pruned: u64,
    pub clusters_removed: u64,
    pub index_rebuilt: bool,
    pub indexed_items: u64,
}

pub struct EnhancedCache;

impl EnhancedCache {
    /// Cache a knowledge item unless a near-duplicate is already stored.
    ///
    /// A new item is indexed for full-text search, linked to related items and
    /// added to its topic cluster. When `post` is given its raw content is
    /// cached too. Either way the item's source URL is linked to the id
    /// returned, so a later lookup of that URL finds the knowledge.
    pub async fn cache_knowledge_item_enhanced(
        db: &CacheDbPool,
        item: &KnowledgeItem,
        post: Option<&PostContent>,
        processing_time_ms: i64,
    ) -> DbResult<CachedKnowledge> {
        let candidates = Self::score_candidates(db.pool(), item).await?;
        let source_hash = url_hash(&item.source_link);

        if let Some(post) = post {
            ContentCacheRepository::cache_post_content(db, &item.source_link, post).await?;
        }

        if let Some(best) = candidates
            .iter()
            .find(|c| c.similarity_score >= DUPLICATE_THRESHOLD)
        {
            store_similarity(db.pool(), &item.id, &best.knowledge_id, best.similarity_score).await?;
            UrlCacheRepository::link_knowledge(db.pool(), &source_hash, &best.knowledge_id).await?;
            db.counters().record_duplicate();
            info!(
                knowledge_id = %item.id,
                existing = %best.knowledge_id,
                score = best.similarity_score,
                "similar knowledge already cached"
            );
            return Ok(CachedKnowledge {
                knowledge_id: best.knowledge_id.clone(),
                is_new: false,
            });
        }

        let cached =
            KnowledgeCacheRepository::cache_knowledge_item(db, item, processing_time_ms).await?;
        UrlCacheRepository::link_knowledge(db.pool(), &source_hash, &cached.knowledge_id).await?;

        if !cached.is_new {
            return Ok(cached);
        }

        for candidate in candidates
            .iter()
            .filter(|c| c.similarity_score >= RELATED_FLOOR)
        {
            store_similarity(db.pool(), &item.id, &candidate.knowledge_id, candidate.similarity_score)
                .await?;
            store_similarity(db.pool(), &candidate.knowledge_id, &item.id, candidate.similarity_score)
                .await?;
        }

        index_item(db.pool(), item).await?;
        update_topic_cluster(db.pool(), item).await?;

        Ok(cached)
    }

    /// Cached items in the same category whose topic contains this item's
    /// topic, scoring at least `threshold`, best first.
    pub async fn find_similar_content(
        pool: &SqlitePool,
        item: &KnowledgeItem,
        threshold: f64,
    ) -> DbResult<Vec<SimilarItem>> {
        Ok(Self::score_candidates(pool, item)
            .await?
            .into_iter()
            .filter(|c| c.similarity_score >= threshold)
            .collect())
    }

    async fn score_candidates(pool: &SqlitePool, item: &KnowledgeItem) -> DbResult<Vec<SimilarItem>> {
        let rows = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT knowledge_id, topic, key_knowledge_content, category
             FROM knowledge_cache
             WHERE category = ? AND topic LIKE ? AND knowledge_id != ?
             ORDER BY last_accessed DESC
             LIMIT ?",
        )
        .bind(item.category.as_str())
        .bind(format!("%{}%", item.topic))
        .bind(&item.id)
        .bind(MAX_SIMILARITY_CANDIDATES)
        .fetch_all(pool)
        .await?;

        let mut scored: Vec<SimilarItem> = rows
            .into_iter()
            .map(|(knowledge_id, topic, content, category)| SimilarItem {
                similarity_score: content_similarity(&item.key_knowledge_content, &content),
                knowledge_id,
                topic,
                category,
            })
            .collect();
        scored.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        Ok(scored)
    }

    /// Full-text search over cached knowledge, falling back to a substring
    /// match when the index has no hit.
    pub async fn search_knowledge(
        pool: &SqlitePool,
        query: &str,
        category: Option<Category>,
        limit: i64,
    ) -> DbResult<Vec<SearchHit>> {
        match fts_search(pool, query, category, limit).await {
            Ok(hits) if !hits.is_empty() => return Ok(hits),
            Ok(_) => debug!(query, "no full-text hits, falling back to LIKE"),
            Err(e) => warn!(query, error = %e, "full-text search failed, falling back to LIKE"),
        }
        like_search(pool, query, category, limit).await
    }

    /// Items linked by similarity, topped up with same-category items on a
    /// similar topic at a flat score of 0.5.
    pub async fn get_related_content(
        pool: &SqlitePool,
        knowledge_id: &str,
        limit: i64,
    ) -> DbResult<Vec<RelatedItem>> {
        let mut related = sqlx::query_as::<_, RelatedItem>(
            "SELECT cs.knowledge_id_2 AS related_id, kc.topic, kc.category,
                    kc.key_knowledge_content, cs.similarity_score
             FROM content_similarity cs
             JOIN knowledge_cache kc ON cs.knowledge_id_2 = kc.knowledge_id
             WHERE cs.knowledge_id_1 = ?
             ORDER BY cs.similarity_score DESC
             LIMIT ?",
        )
        .bind(knowledge_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        let remaining = limit - related.len() as i64;
        if remaining <= 0 {
            return Ok(related);
        }

        let anchor = sqlx::query_as::<_, (String, String)>(
            "SELECT topic, category FROM knowledge_cache WHERE knowledge_id = ?",
        )
        .bind(knowledge_id)
        .fetch_optional(pool)
        .await?;

        if let Some((topic, category)) = anchor {
            let seen: HashSet<String> = related.iter().map(|r| r.related_id.clone()).collect();
            let fillers = sqlx::query_as::<_, RelatedItem>(
                "SELECT knowledge_id AS related_id, topic, category, key_knowledge_content,
                        0.5 AS similarity_score
                 FROM knowledge_cache
                 WHERE category = ? AND topic LIKE ? AND knowledge_id != ?
                 ORDER BY last_accessed DESC
                 LIMIT ?",
            )
            .bind(category)
            .bind(format!("%{topic}%"))
            .bind(knowledge_id)
            .bind(limit)
            .fetch_all(pool)
            .await?;

            related.extend(
                fillers
                    .into_iter()
                    .filter(|f| !seen.contains(&f.related_id))
                    .take(remaining as usize),
            );
        }

        Ok(related)
    }

    pub async fn get_topic_clusters(
        pool: &SqlitePool,
        min_cluster_size: i64,
    ) -> DbResult<Vec<TopicCluster>> {
        let rows = sqlx::query_as::<_, ClusterRow>(
            "SELECT cluster_name, topic_keywords, knowledge_ids, cluster_size, created_at, updated_at
             FROM topic_clusters
             WHERE cluster_size >= ?
             ORDER BY cluster_size DESC, updated_at DESC",
        )
        .bind(min_cluster_size)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(ClusterRow::into_cluster).collect()
    }

    pub async fn get_content_analytics(pool: &SqlitePool) -> DbResult<ContentAnalytics> {
        let category_distribution = sqlx::query_as::<_, (String, i64)>(
            "SELECT category, COUNT(*) FROM knowledge_cache GROUP BY category",
        )
        .fetch_all(pool)
        .await?
        .into_iter()
        .collect();

        let top_topics = sqlx::query_as::<_, (String, i64)>(
            "SELECT topic, COUNT(*) AS count
             FROM knowledge_cache
             GROUP BY topic
             ORDER BY count DESC, topic ASC
             LIMIT 10",
        )
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(topic, count)| TopicCount { topic, count })
        .collect();

        let (total_similarities, avg_similarity, max_similarity) =
            sqlx::query_as::<_, (i64, Option<f64>, Option<f64>)>(
                "SELECT COUNT(*), AVG(similarity_score), MAX(similarity_score) FROM content_similarity",
            )
            .fetch_one(pool)
            .await?;

        let (total_clusters, avg_cluster_size, max_cluster_size) =
            sqlx::query_as::<_, (i64, Option<f64>, Option<i64>)>(
                "SELECT COUNT(*), AVG(cluster_size), MAX(cluster_size) FROM topic_clusters",
            )
            .fetch_one(pool)
            .await?;

        let since = (Utc::now() - Duration::days(7)).timestamp();
        let recent_activity = sqlx::query_as::<_, (String, i64)>(
            "SELECT date(cached_at, 'unixepoch') AS day, COUNT(*)
             FROM knowledge_cache
             WHERE cached_at >= ?
             GROUP BY day",
        )
        .bind(since)
        .fetch_all(pool)
        .await?
        .into_iter()
        .collect();

        Ok(ContentAnalytics {
            category_distribution,
            top_topics,
            similarity_stats: SimilarityStats {
                total_similarities,
                avg_similarity: round_to(avg_similarity.unwrap_or_default(), 3),
                max_similarity: round_to(max_similarity.unwrap_or_default(), 3),
            },
            cluster_stats: ClusterStats {
                total_clusters,
                avg_cluster_size: round_to(avg_cluster_size.unwrap_or_default(), 1),
                max_cluster_size: max_cluster_size.unwrap_or_default(),
            },
            recent_activity,
            generated_at: Utc::now().to_rfc3339(),
        })
    }

    /// Prune weak similarity links and empty clusters, rebuild the search
    /// index from the knowledge table and refresh planner statistics.
    pub async fn optimize_cache(pool: &SqlitePool) -> DbResult<OptimizeReport> {
        let similarities_pruned =
            sqlx::query("DELETE FROM content_similarity WHERE similarity_score < ?")
                .bind(RELATED_FLOOR)
                .execute(pool)
                .await?
                .rows_affected();

        let clusters_removed = sqlx::query("DELETE FROM topic_clusters WHERE cluster_size <= 0")
            .execute(pool)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM knowledge_search")
            .execute(pool)
            .await?;
        let indexed_items = sqlx::query(
            "INSERT INTO knowledge_search
                (knowledge_id, topic, post_title, key_knowledge_content, notes_applications,
                 category, course_references)
             SELECT knowledge_id, topic, post_title, key_knowledge_content, notes_applications,
                    category, course_references
             FROM knowledge_cache",
        )
        .execute(pool)
        .await?
        .rows_affected();

        sqlx::query("ANALYZE").execute(pool).await?;

        let report = OptimizeReport {
            similarities_pruned,
            clusters_removed,
            index_rebuilt: true,
            indexed_items,
        };
        info!(?report, "cache optimization completed");
        Ok(report)
    }
}

/// `0.7 * Jaccard(word sets) + 0.3 * length ratio`, in `[0, 1]`.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count() as f64;
    let union = words_a.union(&words_b).count() as f64;
    let jaccard = intersection / union;

    let (len_a, len_b) = (a.chars().count() as f64, b.chars().count() as f64);
    let length_ratio = len_a.min(len_b) / len_a.max(len_b);

    jaccard * 0.7 + length_ratio * 0.3
}

/// Most frequent words longer than three chars that are not stop words.
pub fn extract_topic_keywords(item: &KnowledgeItem) -> Vec<String> {
    let text = format!("{} {}", item.topic, item.key_knowledge_content).to_lowercase();
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, word) in text.split_whitespace().enumerate() {
        if word.chars().count() > 3 && !STOP_WORDS.contains(&word) {
            counts.entry(word).or_insert((0, position)).0 += 1;
        }
    }

    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(MAX_CLUSTER_KEYWORDS)
        .map(|(word, _, _)| word.to_string())
        .collect()
}

/// Quote each token so user input cannot use FTS5 operators.
pub(crate) fn sanitize_fts5_query(raw: &str) -> String {
    let tokens: Vec<String> = raw
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect();
    if tokens.is_empty() {
        return "\"\"".to_string();
    }
    tokens.join(" ")
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

async fn store_similarity(pool: &SqlitePool, from: &str, to: &str, score: f64) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO content_similarity
            (knowledge_id_1, knowledge_id_2, similarity_score, similarity_type, created_at)
         VALUES (?, ?, ?, 'content_similarity', ?)
         ON CONFLICT(knowledge_id_1, knowledge_id_2) DO UPDATE SET
            similarity_score = excluded.similarity_score",
    )
    .bind(from)
    .bind(to)
    .bind(score)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

async fn index_item(pool: &SqlitePool, item: &KnowledgeItem) -> DbResult<()> {
    sqlx::query("DELETE FROM knowledge_search WHERE knowledge_id = ?")
        .bind(&item.id)
        .execute(pool)
        .await?;
    sqlx::query(
        "INSERT INTO knowledge_search
            (knowledge_id, topic, post_title, key_knowledge_content, notes_applications,
             category, course_references)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&item.id)
    .bind(&item.topic)
    .bind(&item.post_title)
    .bind(&item.key_knowledge_content)
    .bind(&item.notes_applications)
    .bind(item.category.as_str())
    .bind(item.course_references.join(", "))
    .execute(pool)
    .await?;
    Ok(())
}

async fn update_topic_cluster(pool: &SqlitePool, item: &KnowledgeItem) -> DbResult<()> {
    let cluster_name = format!("{}_{}", item.category.as_str(), item.topic);
    let now = Utc::now().timestamp();

    let existing = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, knowledge_ids FROM topic_clusters WHERE cluster_name = ?",
    )
    .bind(&cluster_name)
    .fetch_optional(pool)
    .await?;

    match existing {
        Some((id, raw_ids)) => {
            let mut ids: Vec<String> = serde_json::from_str(&raw_ids)?;
            if ids.contains(&item.id) {
                return Ok(());
            }
            ids.push(item.id.clone());
            sqlx::query(
                "UPDATE topic_clusters SET knowledge_ids = ?, cluster_size = ?, updated_at = ? WHERE id = ?",
            )
            .bind(serde_json::to_string(&ids)?)
            .bind(ids.len() as i64)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO topic_clusters
                    (cluster_name, topic_keywords, knowledge_ids, cluster_size, created_at, updated_at)
                 VALUES (?, ?, ?, 1, ?, ?)",
            )
            .bind(&cluster_name)
            .bind(serde_json::to_string(&extract_topic_keywords(item))?)
            .bind(serde_json::to_string(&[&item.id])?)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct SearchRow {
    knowledge_id: String,
    topic: String,
    post_title: String,
    category: String,
    key_knowledge_content: String,
    notes_applications: String,
    course_references: String,
    extraction_date: String,
    score: f64,
}

impl From<SearchRow> for SearchHit {
    fn from(row: SearchRow) -> Self {
        SearchHit {
            knowledge_id: row.knowledge_id,
            topic: row.topic,
            post_title: row.post_title,
            category: row.category,
            key_knowledge_content: row.key_knowledge_content,
            notes_applications: row.notes_applications,
            course_references: parse_course_list(&row.course_references),
            extraction_date: row.extraction_date,
            score: row.score,
        }
    }
}

/// The index stores a comma-joined list, the knowledge table a JSON array.
fn parse_course_list(raw: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
        return list;
    }
    raw.split(", ")
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .collect()
}

async fn fts_search(
    pool: &SqlitePool,
    query: &str,
    category: Option<Category>,
    limit: i64,
) -> DbResult<Vec<SearchHit>> {
    let safe_query = sanitize_fts5_query(query);
    let category_clause = if category.is_some() {
        " AND kc.category = ?"
    } else {
        ""
    };
    let sql = format!(
        "SELECT kc.knowledge_id, kc.topic, kc.post_title, kc.category, kc.key_knowledge_content,
                kc.notes_applications, kc.course_references, kc.extraction_date,
                bm25(knowledge_search) AS score
         FROM knowledge_search
         JOIN knowledge_cache kc ON kc.knowledge_id = knowledge_search.knowledge_id
         WHERE knowledge_search MATCH ?{category_clause}
         ORDER BY score ASC
         LIMIT ?"
    );

    let mut q = sqlx::query_as::<_, SearchRow>(&sql).bind(safe_query);
    if let Some(category) = category {
        q = q.bind(category.as_str());
    }
    let rows = q.bind(limit).fetch_all(pool).await?;
    Ok(rows.into_iter().map(SearchHit::from).collect())
}

async fn like_search(
    pool: &SqlitePool,
    query: &str,
    category: Option<Category>,
    limit: i64,
) -> DbResult<Vec<SearchHit>> {
    let pattern = format!("%{}%", query.trim());
    let category_clause = if category.is_some() {
        " AND category = ?"
    } else {
        ""
    };
    let sql = format!(
        "SELECT knowledge_id, topic, post_title, category, key_knowledge_content,
                notes_applications, course_references, extraction_date, 0.0 AS score
         FROM knowledge_cache
         WHERE (topic LIKE ? OR post_title LIKE ? OR key_knowledge_content LIKE ?
                OR notes_applications LIKE ?){category_clause}
         ORDER BY cached_at DESC
         LIMIT ?"
    );

    let mut q = sqlx::query_as::<_, SearchRow>(&sql)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern);
    if let Some(category) = category {
        q = q.bind(category.as_str());
    }
    let rows = q.bind(limit).fetch_all(pool).await?;
    Ok(rows.into_iter().map(SearchHit::from).collect())
}

#[derive(Debug, sqlx::FromRow)]
struct ClusterRow {
    cluster_name: String,
    topic_keywords: String,
    knowledge_ids: String,
    cluster_size: i64,
    created_at: i64,
    updated_at: i64,
}

impl ClusterRow {
    fn into_cluster(self) -> DbResult<TopicCluster> {
        Ok(TopicCluster {
            cluster_name: self.cluster_name,
            topic_keywords: serde_json::from_str(&self.topic_keywords)?,
            knowledge_ids: serde_json::from_str(&self.knowledge_ids)?,
            cluster_size: self.cluster_size,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
