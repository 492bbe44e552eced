//! Rule-based cleaning and insight extraction for post text.

use std::sync::LazyLock;

use lkm_core::{ImageData, PostContent};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\w+").expect("hashtag regex"));
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\w+").expect("mention regex"));
static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").expect("url regex"));
static SENTENCE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("sentence regex"));
static REPEATED_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[!?]{2,}").expect("punctuation regex"));

static FLUFF_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"like\s+and\s+share",
        r"follow\s+(?:me|us)\s+for\s+more",
        r"don't\s+forget\s+to\s+(?:like|share|follow)",
        r"what\s+do\s+you\s+think\?",
        r"let\s+me\s+know\s+in\s+the\s+comments",
        r"tag\s+someone\s+who",
        r"double\s+tap\s+if",
        r"swipe\s+left\s+for\s+more",
        r"link\s+in\s+(?:bio|comments)",
        r"dm\s+me\s+for",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("fluff regex"))
    .collect()
});

static KNOWLEDGE_INDICATORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"here's\s+(?:how|why|what)",
        r"key\s+(?:insights?|takeaways?|learnings?)",
        r"important\s+to\s+(?:know|understand|remember)",
        r"best\s+practices?\s+(?:for|in)",
        r"tips?\s+(?:for|to)",
        r"strategies?\s+(?:for|to)",
        r"framework\s+(?:for|to)",
        r"methodology\s+(?:for|to)",
        r"approach\s+(?:to|for)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("indicator regex"))
    .collect()
});

static COURSE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"course\s+(?:on|about|in)\s+([^.!?]+)",
        r"learn\s+([^.!?]+)\s+(?:course|training|program)",
        r"certification\s+(?:in|for)\s+([^.!?]+)",
        r"masterclass\s+(?:on|in)\s+([^.!?]+)",
        r"workshop\s+(?:on|about)\s+([^.!?]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("course regex"))
    .collect()
});

static ALT_TEXT_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)no alternative text description for this image|image may contain:")
        .expect("alt text regex")
});
static GENERIC_ALT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(image|photo|picture)s?$").expect("generic alt regex"));

const INSIGHT_WORDS: [&str; 14] = [
    "key",
    "important",
    "crucial",
    "essential",
    "critical",
    "remember",
    "note",
    "tip",
    "strategy",
    "approach",
    "best practice",
    "lesson",
    "insight",
    "takeaway",
];

const GENERIC_IMAGE_INSIGHT: &str = "Visual content (infographic/chart/diagram)";

/// Everything the rule-based pass derives from one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedKnowledge {
    pub cleaned_content: String,
    pub knowledge_content: String,
    pub key_insights: Vec<String>,
    pub course_references: Vec<String>,
    pub image_insights: String,
    pub summary: String,
    pub word_count: usize,
    pub is_valid: bool,
}

pub fn extract_knowledge(post: &PostContent) -> ExtractedKnowledge {
    let cleaned_content = clean_text(&post.body_text);
    let knowledge_content = remove_marketing_fluff(&cleaned_content);
    let key_insights = extract_key_insights(&cleaned_content, 5);
    let course_references = extract_course_references(&cleaned_content);
    let image_insights = extract_image_insights(&post.images);
    let summary = generate_summary(&cleaned_content, 200);
    let is_valid = validate_extracted_content(&knowledge_content);

    debug!(
        url = %post.url,
        original_len = post.body_text.len(),
        knowledge_len = knowledge_content.len(),
        is_valid,
        "extracted knowledge"
    );

    ExtractedKnowledge {
        word_count: cleaned_content.split_whitespace().count(),
        cleaned_content,
        knowledge_content,
        key_insights,
        course_references,
        image_insights,
        summary,
        is_valid,
    }
}

/// Collapse whitespace and drop hashtags, mentions and links.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = WHITESPACE_RE.replace_all(text, " ");
    let text = HASHTAG_RE.replace_all(&text, "");
    let text = MENTION_RE.replace_all(&text, "");
    let text = URL_RE.replace_all(&text, "");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

pub fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    SENTENCE_SPLIT_RE
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Calls to action, very short fragments and shouting.
pub fn is_fluff(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    FLUFF_PATTERNS.iter().any(|p| p.is_match(&lower))
        || sentence.split_whitespace().count() < 4
        || REPEATED_PUNCT_RE.is_match(sentence)
}

pub fn has_knowledge_indicator(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    KNOWLEDGE_INDICATORS.iter().any(|p| p.is_match(&lower))
}

pub fn remove_marketing_fluff(text: &str) -> String {
    let kept: Vec<&str> = split_sentences(text)
        .filter(|s| !is_fluff(s))
        .filter(|s| has_knowledge_indicator(s) || s.chars().count() > 20)
        .collect();
    WHITESPACE_RE
        .replace_all(&kept.join(". "), " ")
        .trim()
        .to_string()
}

/// Course and training mentions, title-cased, first occurrence wins.
pub fn extract_course_references(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut refs: Vec<String> = Vec::new();
    for pattern in COURSE_PATTERNS.iter() {
        for captures in pattern.captures_iter(&lower) {
            let Some(found) = captures.get(1) else {
                continue;
            };
            let found = found.as_str().trim();
            if found.chars().count() > 3 {
                let titled = title_case(found);
                if !refs.contains(&titled) {
                    refs.push(titled);
                }
            }
        }
    }
    refs
}

pub fn extract_image_insights(images: &[ImageData]) -> String {
    images
        .iter()
        .enumerate()
        .map(|(i, image)| {
            let alt = image
                .alt_text
                .as_deref()
                .filter(|alt| alt.chars().count() > 10)
                .map(clean_alt_text)
                .unwrap_or_default();
            if alt.is_empty() {
                format!("Image {}: {GENERIC_IMAGE_INSIGHT}", i + 1)
            } else {
                format!("Image {}: {alt}", i + 1)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn clean_alt_text(alt: &str) -> String {
    let stripped = ALT_TEXT_NOISE_RE.replace_all(alt, "");
    let collapsed = WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string();
    if collapsed.chars().count() > 10 && !GENERIC_ALT_RE.is_match(&collapsed.to_lowercase()) {
        collapsed
    } else {
        String::new()
    }
}

/// Substantial sentences, longest first.
pub fn extract_key_insights(text: &str, max_insights: usize) -> Vec<String> {
    let mut insights: Vec<String> = split_sentences(text)
        .filter(|s| s.chars().count() >= 20)
        .filter(|s| {
            let lower = s.to_lowercase();
            INSIGHT_WORDS.iter().any(|w| lower.contains(w))
                || (s.chars().count() > 50 && !is_fluff(s))
        })
        .map(str::to_string)
        .collect();
    insights.sort_by_key(|s| std::cmp::Reverse(s.chars().count()));
    insights.truncate(max_insights);
    insights
}

pub fn generate_summary(text: &str, max_len: usize) -> String {
    if text.is_empty() {
        return String::new();
    }
    let insights = extract_key_insights(text, 3);
    let summary = if insights.is_empty() {
        text.to_string()
    } else {
        insights.join(". ")
    };
    truncate_with_ellipsis(&summary, max_len)
}

/// At least 50 chars, and no more than half the sentences are fluff.
pub fn validate_extracted_content(knowledge_content: &str) -> bool {
    if knowledge_content.chars().count() < 50 {
        debug!("extracted content too short");
        return false;
    }
    let sentences: Vec<&str> = split_sentences(knowledge_content).collect();
    if sentences.is_empty() {
        return false;
    }
    let fluff = sentences.iter().filter(|s| is_fluff(s)).count();
    if fluff * 2 > sentences.len() {
        debug!(fluff, total = sentences.len(), "extracted content mostly fluff");
        return false;
    }
    true
}

pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_strips_tags_mentions_links() {
        let cleaned = clean_text("Great   thread by @jane on #rust\n see https://example.com/x now");
        assert_eq!(cleaned, "Great thread by on see now");
    }

    #[test]
    fn test_fluff_detection() {
        assert!(is_fluff("Like and share if this helped you today"));
        assert!(is_fluff("Thanks all"));
        assert!(is_fluff("This is amazing news for everyone!!"));
        assert!(!is_fluff("Caching reduces latency for repeated reads"));
    }

    #[test]
    fn test_remove_marketing_fluff_keeps_knowledge() {
        let text = "Here's how we cut cloud costs by half. Follow me for more content like this. \
                    Reserved instances and autoscaling did most of the work.";
        let kept = remove_marketing_fluff(text);
        assert_eq!(
            kept,
            "Here's how we cut cloud costs by half. Reserved instances and autoscaling did most of the work"
        );
    }

    #[test]
    fn test_extract_course_references() {
        let refs = extract_course_references(
            "I took a course on machine learning basics. Then a workshop on prompt design. \
             Another course on machine learning basics.",
        );
        assert_eq!(refs, vec!["Machine Learning Basics", "Prompt Design"]);
    }

    #[test]
    fn test_image_insights() {
        let images = vec![
            ImageData::new("https://media.licdn.com/a.jpg", "a.jpg")
                .unwrap()
                .with_alt_text("Image may contain: chart of SaaS revenue growth"),
            ImageData::new("https://media.licdn.com/b.jpg", "b.jpg").unwrap(),
            ImageData::new("https://media.licdn.com/c.jpg", "c.jpg")
                .unwrap()
                .with_alt_text("No alternative text description for this image"),
        ];
        assert_eq!(
            extract_image_insights(&images),
            "Image 1: chart of SaaS revenue growth; \
             Image 2: Visual content (infographic/chart/diagram); \
             Image 3: Visual content (infographic/chart/diagram)"
        );
    }

    #[test]
    fn test_key_insights_sorted_longest_first() {
        let text = "The key lesson is to ship small. Short one. \
                    Teams that measure lead time consistently tend to improve delivery speed over quarters.";
        let insights = extract_key_insights(text, 5);
        assert_eq!(insights.len(), 2);
        assert!(insights[0].starts_with("Teams that measure"));
        assert_eq!(insights[1], "The key lesson is to ship small");
    }

    #[test]
    fn test_generate_summary_truncates() {
        let long = "Important: ".to_string() + &"word ".repeat(80);
        let summary = generate_summary(&long, 50);
        assert_eq!(summary.chars().count(), 50);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_validate_extracted_content() {
        assert!(!validate_extracted_content("too short"));
        assert!(validate_extracted_content(
            "Caching reduces latency for repeated reads. Invalidation remains the hard part of caching"
        ));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("data science for product-managers"), "Data Science For Product-Managers");
    }
}
