//! Stable digests used as cache keys.
//!
//! All hashes are the first 16 hex chars of a SHA-256 digest. Content and
//! knowledge hashes digest a canonical JSON object whose keys serialize in
//! sorted order.

use lkm_core::{KnowledgeItem, PostContent, url_parser};
use serde_json::json;
use sha2::{Digest, Sha256};

const HASH_LEN: usize = 16;

fn short_digest(input: &str) -> String {
    let digest = hex::encode(Sha256::digest(input.as_bytes()));
    digest[..HASH_LEN].to_string()
}

/// Hash of the normalized URL, falling back to the raw input when the URL
/// does not parse as a LinkedIn post.
pub fn url_hash(url: &str) -> String {
    match url_parser::parse_url(url) {
        Ok(info) => short_digest(&info.normalized_url),
        Err(_) => short_digest(url),
    }
}

pub fn content_hash(post: &PostContent) -> String {
    let canonical = json!({
        "author": post.author,
        "body_text": post.body_text,
        "post_date": post.post_date.map(|d| d.to_rfc3339()),
        "title": post.title,
    });
    short_digest(&canonical.to_string())
}

/// Identity of a knowledge item for duplicate detection. Two extractions with
/// the same topic, category and content collapse onto one cache row.
pub fn knowledge_hash(item: &KnowledgeItem) -> String {
    let canonical = json!({
        "category": item.category.as_str(),
        "key_knowledge_content": item.key_knowledge_content,
        "topic": item.topic,
    });
    short_digest(&canonical.to_string())
}
