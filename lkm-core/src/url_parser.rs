//! LinkedIn URL parsing, cleaning and validation.
//!
//! Every URL entering the system goes through [`parse_url`] first: it is
//! cleaned (scheme added, tracking parameters dropped, trailing slash removed)
//! and then matched against the known post shapes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::errors::{CoreError, CoreResult};

const LINKEDIN_DOMAINS: [&str; 4] = [
    "linkedin.com",
    "www.linkedin.com",
    "m.linkedin.com",
    "mobile.linkedin.com",
];

const TRACKING_PARAMS: [&str; 11] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "trackingId",
    "lipi",
    "licu",
    "trk",
    "trkInfo",
    "originalSubdomain",
];

static URL_PATTERNS: LazyLock<Vec<(PostType, Regex)>> = LazyLock::new(|| {
    let host = r"^https?://(?:(?:www|m|mobile)\.)?linkedin\.com";
    vec![
        (
            PostType::Activity,
            Regex::new(&format!(
                r"(?i){host}/feed/update/urn:li:activity:(?P<post_id>\d+)"
            ))
            .expect("activity regex"),
        ),
        (
            PostType::Posts,
            Regex::new(&format!(
                r"(?i){host}/posts/(?P<author_id>[^/]+)_(?P<post_id>[^/?]+)"
            ))
            .expect("posts regex"),
        ),
        (
            PostType::Pulse,
            Regex::new(&format!(r"(?i){host}/pulse/(?P<post_id>[^/?]+)")).expect("pulse regex"),
        ),
        (
            PostType::CompanyPosts,
            Regex::new(&format!(
                r"(?i){host}/company/[^/]+/posts/(?P<post_id>[^/?]+)"
            ))
            .expect("company regex"),
        ),
    ]
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").expect("phone regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    Activity,
    Posts,
    Pulse,
    CompanyPosts,
}

impl PostType {
    pub fn as_str(self) -> &'static str {
        match self {
            PostType::Activity => "activity",
            PostType::Posts => "posts",
            PostType::Pulse => "pulse",
            PostType::CompanyPosts => "company_posts",
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information extracted from a LinkedIn post URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedInPostInfo {
    /// The URL as given by the caller.
    pub url: String,
    pub post_type: PostType,
    pub post_id: String,
    pub author_id: Option<String>,
    /// Cleaned URL used for fetching and caching.
    pub normalized_url: String,
}

/// An entry rejected by [`validate_batch_urls`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidUrl {
    pub url: String,
    pub error: String,
}

/// Parse a LinkedIn URL into its post information.
pub fn parse_url(url: &str) -> CoreResult<LinkedInPostInfo> {
    if url.trim().is_empty() {
        return Err(CoreError::validation("url", url));
    }

    let cleaned = clean_url(url)?;

    for (post_type, pattern) in URL_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(&cleaned) {
            let Some(post_id) = captures.name("post_id") else {
                continue;
            };
            let info = LinkedInPostInfo {
                url: url.to_string(),
                post_type: *post_type,
                post_id: post_id.as_str().to_string(),
                author_id: captures.name("author_id").map(|m| m.as_str().to_string()),
                normalized_url: cleaned.clone(),
            };
            debug!(post_type = %info.post_type, post_id = %info.post_id, "parsed LinkedIn URL");
            return Ok(info);
        }
    }

    Err(CoreError::validation("url", url))
}

pub fn is_valid_linkedin_url(url: &str) -> bool {
    parse_url(url).is_ok()
}

/// Normalise a LinkedIn URL: add a scheme, require a LinkedIn host, drop
/// tracking parameters and the trailing slash.
pub fn clean_url(url: &str) -> CoreResult<String> {
    let trimmed = url.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&with_scheme).map_err(|_| CoreError::validation("url", url))?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| CoreError::validation("url", url))?
        .to_ascii_lowercase();

    if !is_linkedin_domain(&host) {
        return Err(CoreError::validation("url.domain", host));
    }

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, value)| !TRACKING_PARAMS.contains(&key.as_ref()) && !value.is_empty())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut cleaned = format!("{}://{}{}", parsed.scheme(), host, parsed.path());
    if !kept.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept.iter())
            .finish();
        cleaned.push('?');
        cleaned.push_str(&query);
    }

    if cleaned.ends_with('/') {
        cleaned.pop();
    }

    Ok(cleaned)
}

pub fn is_linkedin_domain(domain: &str) -> bool {
    LINKEDIN_DOMAINS.contains(&domain.to_ascii_lowercase().as_str())
}

/// Metadata derived from the URL alone.
///
/// For `posts` URLs the author slug usually carries the author's name, which is
/// exposed as `author_hint`.
pub fn extract_post_metadata(url: &str) -> CoreResult<BTreeMap<String, String>> {
    let info = parse_url(url)?;
    let mut metadata = BTreeMap::new();
    metadata.insert("post_type".to_string(), info.post_type.to_string());
    metadata.insert("post_id".to_string(), info.post_id.clone());
    metadata.insert("normalized_url".to_string(), info.normalized_url.clone());

    if let Some(author_id) = &info.author_id {
        metadata.insert("author_id".to_string(), author_id.clone());
        if info.post_type == PostType::Posts {
            metadata.insert(
                "author_hint".to_string(),
                author_id.replace(['-', '_'], " "),
            );
        }
    }

    Ok(metadata)
}

/// Stable cache key: `{post_type}:{post_id}` when the URL parses, otherwise a
/// digest of the raw URL.
pub fn generate_cache_key(url: &str) -> String {
    match parse_url(url) {
        Ok(info) => format!("{}:{}", info.post_type, info.post_id),
        Err(_) => {
            let digest = hex::encode(Sha256::digest(url.as_bytes()));
            format!("url:{}", &digest[..32])
        }
    }
}

/// Split a batch into parsed and rejected URLs.
pub fn validate_batch_urls<S: AsRef<str>>(urls: &[S]) -> (Vec<LinkedInPostInfo>, Vec<InvalidUrl>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();

    for url in urls {
        let url = url.as_ref();
        match parse_url(url) {
            Ok(info) => valid.push(info),
            Err(e) => invalid.push(InvalidUrl {
                url: url.to_string(),
                error: e.to_string(),
            }),
        }
    }

    info!(
        valid = valid.len(),
        invalid = invalid.len(),
        "validated URL batch"
    );
    (valid, invalid)
}

/// Mask e-mail addresses and phone numbers with fixed markers.
pub fn sanitize_pii(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = EMAIL_RE.replace_all(text, "[EMAIL_REDACTED]");
    PHONE_RE.replace_all(&text, "[PHONE_REDACTED]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_activity_url() {
        let info =
            parse_url("https://www.linkedin.com/feed/update/urn:li:activity:7123456789012345678/")
                .unwrap();
        assert_eq!(info.post_type, PostType::Activity);
        assert_eq!(info.post_id, "7123456789012345678");
        assert_eq!(
            info.normalized_url,
            "https://www.linkedin.com/feed/update/urn:li:activity:7123456789012345678"
        );
    }

    #[test]
    fn parses_posts_url_with_author() {
        let info = parse_url(
            "https://www.linkedin.com/posts/jane-doe_rust-activity-123?utm_source=share&utm_medium=web",
        )
        .unwrap();
        assert_eq!(info.post_type, PostType::Posts);
        assert_eq!(info.author_id.as_deref(), Some("jane-doe"));
        assert_eq!(info.post_id, "rust-activity-123");
        assert!(!info.normalized_url.contains("utm_"));
    }

    #[test]
    fn adds_scheme_and_keeps_non_tracking_params() {
        let cleaned = clean_url("linkedin.com/pulse/some-article?trk=abc&lang=en").unwrap();
        assert_eq!(cleaned, "https://linkedin.com/pulse/some-article?lang=en");
    }

    #[test]
    fn rejects_other_domains() {
        assert!(clean_url("https://example.com/posts/a_b").is_err());
        assert!(!is_valid_linkedin_url("https://www.linkedin.com/in/someone"));
        assert!(!is_valid_linkedin_url("   "));
    }

    #[test]
    fn company_posts_and_pulse() {
        let info = parse_url("https://www.linkedin.com/company/acme/posts/xyz").unwrap();
        assert_eq!(info.post_type, PostType::CompanyPosts);
        let info = parse_url("https://www.linkedin.com/pulse/great-article-jane").unwrap();
        assert_eq!(info.post_type, PostType::Pulse);
        assert_eq!(info.post_id, "great-article-jane");
    }

    #[test]
    fn metadata_includes_author_hint() {
        let meta = extract_post_metadata("https://www.linkedin.com/posts/jane_doe-smith_abc").unwrap();
        assert_eq!(meta.get("author_id").map(String::as_str), Some("jane_doe-smith"));
        assert_eq!(
            meta.get("author_hint").map(String::as_str),
            Some("jane doe smith")
        );

        let meta = extract_post_metadata("https://www.linkedin.com/posts/jane-doe_abc").unwrap();
        assert_eq!(meta.get("author_hint").map(String::as_str), Some("jane doe"));
    }

    #[test]
    fn cache_keys() {
        assert_eq!(
            generate_cache_key("https://www.linkedin.com/feed/update/urn:li:activity:42"),
            "activity:42"
        );
        let fallback = generate_cache_key("not a url");
        assert!(fallback.starts_with("url:"));
        assert_eq!(fallback.len(), 4 + 32);
    }

    #[test]
    fn batch_validation_splits_results() {
        let (valid, invalid) = validate_batch_urls(&[
            "https://www.linkedin.com/feed/update/urn:li:activity:1",
            "https://twitter.com/x",
        ]);
        assert_eq!(valid.len(), 1);
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].url, "https://twitter.com/x");
    }

    #[test]
    fn sanitize_pii_masks_contacts() {
        let text = "Reach me at jane.doe@corp.io or 555-123-4567.";
        assert_eq!(
            sanitize_pii(text),
            "Reach me at [EMAIL_REDACTED] or [PHONE_REDACTED]."
        );
    }
}
