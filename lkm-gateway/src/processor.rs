//! Turns scraped posts into knowledge items, with the model doing the
//! extraction and keyword rules as the fallback.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lkm_core::config::{SecuritySettings, Settings};
use lkm_core::{Category, ImageData, KnowledgeItem, PostContent, url_parser};
use lkm_knowledge::extractor::{
    clean_text, extract_course_references, has_knowledge_indicator, is_fluff, split_sentences,
};
use lkm_knowledge::scraper::generate_title;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::errors::{ProcessingError, ProcessingResult};
use crate::providers::{PromptTemplate, Provider, ProviderHealth, RateLimitStatus};

static NON_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("non-word regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

const GENERIC_IMAGE: &str = "Visual content (chart/infographic/diagram)";
const DEFAULT_TOPIC: &str = "General";

/// Topic keywords checked in order; the first category with a hit wins.
const TOPIC_CATEGORY_KEYWORDS: [(Category, &[&str]); 6] = [
    (
        Category::AiMachineLearning,
        &["ai", "artificial intelligence", "machine learning", "ml", "deep learning", "neural", "algorithm"],
    ),
    (
        Category::SaasBusiness,
        &["saas", "software", "business", "startup", "revenue", "subscription", "growth"],
    ),
    (
        Category::MarketingSales,
        &["marketing", "sales", "lead generation", "conversion", "branding", "seo", "social media"],
    ),
    (
        Category::LeadershipManagement,
        &["leadership", "management", "team", "culture", "hiring", "strategy", "communication"],
    ),
    (
        Category::TechnologyTrends,
        &["technology", "innovation", "digital", "cloud", "cybersecurity", "blockchain", "iot"],
    ),
    (
        Category::CourseContent,
        &["course", "training", "certification", "learning", "education", "workshop", "tutorial"],
    ),
];

/// Keywords scored against the whole post when the model is unavailable.
const FALLBACK_TOPIC_KEYWORDS: [(Category, &[&str]); 6] = [
    (
        Category::AiMachineLearning,
        &["ai", "artificial intelligence", "machine learning", "deep learning", "neural network", "algorithm"],
    ),
    (
        Category::SaasBusiness,
        &["saas", "software as a service", "business model", "startup", "revenue", "subscription"],
    ),
    (
        Category::MarketingSales,
        &["marketing", "sales", "lead generation", "conversion", "branding", "seo"],
    ),
    (
        Category::LeadershipManagement,
        &["leadership", "management", "team building", "culture", "strategy"],
    ),
    (
        Category::TechnologyTrends,
        &["technology", "innovation", "digital transformation", "cloud computing", "cybersecurity"],
    ),
    (
        Category::CourseContent,
        &["course", "training", "certification", "learning", "education", "workshop"],
    ),
];

/// Sections pulled out of a model answer or built by the fallback rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub knowledge: String,
    pub topic: String,
    pub category: Category,
    pub courses: String,
    pub summary: String,
    pub used_fallback: bool,
}

impl Default for ExtractionResult {
    fn default() -> Self {
        Self {
            knowledge: String::new(),
            topic: DEFAULT_TOPIC.to_string(),
            category: Category::Other,
            courses: String::new(),
            summary: String::new(),
            used_fallback: false,
        }
    }
}

impl ExtractionResult {
    /// Reject answers that are too thin to keep.
    pub fn is_meaningful(&self) -> bool {
        if self.knowledge.chars().count() < 30 || self.summary == self.knowledge {
            return false;
        }
        let topic = self.topic.trim().to_lowercase();
        !(topic.is_empty() || matches!(topic.as_str(), "general" | "unknown" | "none"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorConfigView {
    pub sanitize_content: bool,
    pub enable_pii_detection: bool,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingStats {
    pub provider_status: ProviderHealth,
    pub rate_limits: Option<RateLimitStatus>,
    pub config: ProcessorConfigView,
    pub timestamp: DateTime<Utc>,
}

pub struct ContentProcessor {
    provider: Arc<dyn Provider>,
    security: SecuritySettings,
    batch_size: usize,
    item_delay: Duration,
}

impl ContentProcessor {
    pub fn new(provider: Arc<dyn Provider>, settings: &Settings) -> Self {
        Self {
            provider,
            security: settings.security.clone(),
            batch_size: settings.processing.batch_size,
            item_delay: Duration::from_secs(1),
        }
    }

    /// Pause between posts in [`ContentProcessor::batch_process_posts`].
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub async fn process_post_content(&self, post: &PostContent) -> ProcessingResult<KnowledgeItem> {
        info!(url = %post.url, "Processing post content");

        let text = if self.security.sanitize_content && self.security.enable_pii_detection {
            let sanitized = url_parser::sanitize_pii(&post.body_text);
            if sanitized != post.body_text {
                info!(url = %post.url, "PII masked before extraction");
            }
            sanitized
        } else {
            post.body_text.clone()
        };

        let extraction = self.extract_knowledge(&text).await;
        let title = if post.title.trim().is_empty() {
            generate_title(&text)
        } else {
            post.title.clone()
        };
        let knowledge = if extraction.knowledge.trim().is_empty() {
            text.clone()
        } else {
            extraction.knowledge
        };

        let item = KnowledgeItem::new(
            extraction.topic,
            title,
            knowledge,
            process_images(&post.images),
            post.url.clone(),
            extraction.summary,
            extraction.category,
            parse_course_references(&extraction.courses),
        )
        .map_err(|e| {
            error!(url = %post.url, error = %e, "Failed to build knowledge item");
            ProcessingError::stage(
                "ai_processing",
                Some(&post.url),
                format!("Content processing failed: {e}"),
            )
        })?;

        info!(url = %post.url, knowledge_id = %item.id, fallback = extraction.used_fallback, "Post processed");
        Ok(item)
    }

    /// Ask the model first; fall back to keyword rules on errors or thin
    /// answers.
    pub async fn extract_knowledge(&self, content: &str) -> ExtractionResult {
        let prompt = PromptTemplate::KnowledgeExtraction.render(content);
        match self.provider.generate_content(&prompt).await {
            Ok(response) => {
                let parsed = parse_ai_response(&response);
                if parsed.is_meaningful() {
                    debug!("AI knowledge extraction accepted");
                    parsed
                } else {
                    warn!("AI extraction failed validation, using fallback");
                    fallback_extraction(content)
                }
            }
            Err(e) => {
                warn!(code = e.error_code(), error = %e, "AI extraction failed, using fallback");
                fallback_extraction(content)
            }
        }
    }

    /// Process posts one by one. Failures are logged and skipped.
    pub async fn batch_process_posts(&self, posts: &[PostContent]) -> Vec<KnowledgeItem> {
        info!(count = posts.len(), "Starting batch processing");
        let mut items = Vec::with_capacity(posts.len());

        for (i, post) in posts.iter().enumerate() {
            match self.process_post_content(post).await {
                Ok(item) => items.push(item),
                Err(e) => error!(index = i + 1, url = %post.url, error = %e, "Failed to process post"),
            }
            if i + 1 < posts.len() && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
        }

        info!(successful = items.len(), total = posts.len(), "Batch processing completed");
        items
    }

    pub async fn processing_stats(&self) -> ProcessingStats {
        ProcessingStats {
            provider_status: self.provider.health_check().await,
            rate_limits: self.provider.rate_limit_status(),
            config: ProcessorConfigView {
                sanitize_content: self.security.sanitize_content,
                enable_pii_detection: self.security.enable_pii_detection,
                batch_size: self.batch_size,
            },
            timestamp: Utc::now(),
        }
    }
}

/// Parse `KNOWLEDGE:` / `TOPIC:` / `COURSES:` / `SUMMARY:` sections.
/// Lines without a header continue the previous section.
pub fn parse_ai_response(response: &str) -> ExtractionResult {
    #[derive(Clone, Copy)]
    enum Section {
        Knowledge,
        Topic,
        Courses,
        Summary,
    }

    let mut result = ExtractionResult::default();
    let mut current: Option<Section> = None;

    for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (section, text) = if let Some(rest) = line.strip_prefix("KNOWLEDGE:") {
            (Section::Knowledge, rest)
        } else if let Some(rest) = line.strip_prefix("TOPIC:") {
            (Section::Topic, rest)
        } else if let Some(rest) = line.strip_prefix("COURSES:") {
            (Section::Courses, rest)
        } else if let Some(rest) = line.strip_prefix("SUMMARY:") {
            (Section::Summary, rest)
        } else {
            let Some(section) = current else {
                continue;
            };
            let target = match section {
                Section::Knowledge => &mut result.knowledge,
                Section::Topic => &mut result.topic,
                Section::Courses => &mut result.courses,
                Section::Summary => &mut result.summary,
            };
            target.push(' ');
            target.push_str(line);
            continue;
        };

        current = Some(section);
        let value = text.trim().to_string();
        match section {
            Section::Knowledge => result.knowledge = value,
            Section::Topic => result.topic = value,
            Section::Courses => result.courses = value,
            Section::Summary => result.summary = value,
        }
    }

    result.knowledge = result.knowledge.trim().to_string();
    result.topic = result.topic.trim().to_string();
    result.courses = result.courses.trim().to_string();
    result.summary = result.summary.trim().to_string();
    result.category = map_topic_to_category(&result.topic);
    result
}

pub fn map_topic_to_category(topic: &str) -> Category {
    let lower = topic.to_lowercase();
    if lower.is_empty() {
        return Category::Other;
    }
    TOPIC_CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(Category::Other)
}

/// Rule-based extraction used when the model fails or answers poorly.
pub fn fallback_extraction(content: &str) -> ExtractionResult {
    info!("Using rule-based knowledge extraction");
    let cleaned = clean_text(content);

    let sentences: Vec<&str> = split_sentences(&cleaned)
        .filter(|s| s.chars().count() >= 20)
        .filter(|s| !is_fluff(s))
        .filter(|s| has_knowledge_indicator(s) || s.chars().count() > 50)
        .take(5)
        .collect();

    let topic = detect_topic(&cleaned);
    let courses: Vec<String> = extract_course_references(&cleaned)
        .into_iter()
        .filter(|c| c.chars().count() < 100)
        .collect();

    ExtractionResult {
        knowledge: sentences.join(" "),
        category: map_topic_to_category(&topic),
        topic,
        courses: courses.join(", "),
        summary: summarize(&sentences),
        used_fallback: true,
    }
}

fn detect_topic(content: &str) -> String {
    let lower = content.to_lowercase();
    let mut best: Option<(Category, usize)> = None;
    for (category, keywords) in FALLBACK_TOPIC_KEYWORDS.iter() {
        let score = keywords.iter().filter(|k| lower.contains(*k)).count();
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((*category, score));
        }
    }
    best.map(|(category, _)| category.to_string())
        .unwrap_or_else(|| DEFAULT_TOPIC.to_string())
}

/// Up to three sentences while the total stays within 200 chars.
fn summarize(sentences: &[&str]) -> String {
    let mut parts = Vec::new();
    let mut total = 0;
    for sentence in sentences.iter().take(3) {
        let len = sentence.chars().count();
        if total + len > 200 {
            break;
        }
        parts.push(*sentence);
        total += len;
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{}.", parts.join(". "))
    }
}

pub fn process_images(images: &[ImageData]) -> String {
    images
        .iter()
        .enumerate()
        .map(|(i, image)| {
            let alt = image
                .alt_text
                .as_deref()
                .map(|alt| {
                    let stripped = NON_WORD_RE.replace_all(alt, " ");
                    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
                })
                .filter(|alt| alt.chars().count() > 10)
                .unwrap_or_else(|| GENERIC_IMAGE.to_string());
            format!("Image {}: {alt}", i + 1)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn parse_course_references(courses: &str) -> Vec<String> {
    let trimmed = courses.trim();
    if trimmed.is_empty() || matches!(trimmed.to_lowercase().as_str(), "none" | "n/a") {
        return Vec::new();
    }
    trimmed
        .split([',', ';'])
        .map(str::trim)
        .filter(|c| (4..100).contains(&c.chars().count()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;

    struct Scripted(Result<&'static str, ()>);

    #[async_trait::async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn generate_content(&self, _prompt: &str) -> Result<String, ProviderError> {
            self.0
                .map(str::to_string)
                .map_err(|_| ProviderError::EmptyResponse)
        }
    }

    fn post(body: &str) -> PostContent {
        PostContent {
            url: "https://www.linkedin.com/posts/jane-doe_rag-activity-1".to_string(),
            title: "RAG in production".to_string(),
            body_text: body.to_string(),
            author: "Jane Doe".to_string(),
            post_date: None,
            images: vec![],
            engagement_metrics: Default::default(),
        }
    }

    const BODY: &str = "Here's how we cut retrieval latency in half with hybrid search. \
        We combined BM25 with dense embeddings and reranked the top fifty candidates. \
        Contact me at jane@example.com for more. Like and share!";

    #[test]
    fn parses_sections_with_continuations() {
        let parsed = parse_ai_response(
            "KNOWLEDGE: Hybrid search combines BM25\nwith dense embeddings.\nTOPIC: Machine Learning\n\
             COURSES: None\nSUMMARY: Use hybrid retrieval.",
        );
        assert_eq!(parsed.knowledge, "Hybrid search combines BM25 with dense embeddings.");
        assert_eq!(parsed.topic, "Machine Learning");
        assert_eq!(parsed.category, Category::AiMachineLearning);
        assert_eq!(parsed.courses, "None");
        assert!(parsed.is_meaningful());
    }

    #[test]
    fn rejects_thin_answers() {
        let thin = parse_ai_response("KNOWLEDGE: short\nTOPIC: AI");
        assert!(!thin.is_meaningful());

        let generic = parse_ai_response(
            "KNOWLEDGE: A long enough knowledge section for the check.\nTOPIC: General\nSUMMARY: x",
        );
        assert!(!generic.is_meaningful());
    }

    #[test]
    fn maps_topics() {
        assert_eq!(map_topic_to_category("SaaS growth"), Category::SaasBusiness);
        assert_eq!(map_topic_to_category("Team culture"), Category::LeadershipManagement);
        assert_eq!(map_topic_to_category("Quantum"), Category::Other);
        assert_eq!(map_topic_to_category(""), Category::Other);
    }

    #[test]
    fn fallback_keeps_knowledge_sentences() {
        let result = fallback_extraction(BODY);
        assert!(result.used_fallback);
        assert!(result.knowledge.starts_with("Here's how we cut retrieval latency"));
        assert!(!result.knowledge.contains("Like and share"));
        assert_eq!(result.topic, "General");
        assert!(result.summary.ends_with('.'));
    }

    #[test]
    fn fallback_scores_topics() {
        let result = fallback_extraction(
            "Our startup doubled revenue after switching to a subscription business model. \
             Machine learning helped too.",
        );
        assert_eq!(result.topic, "SaaS & Business");
        assert_eq!(result.category, Category::SaasBusiness);
    }

    #[test]
    fn image_insights_and_courses() {
        let images = vec![
            ImageData::new("https://media.licdn.com/a.png", "a.png")
                .unwrap()
                .with_alt_text("Chart: retrieval latency (p95) by strategy"),
            ImageData::new("https://media.licdn.com/b.png", "b.png").unwrap(),
        ];
        assert_eq!(
            process_images(&images),
            "Image 1: Chart retrieval latency p95 by strategy; \
             Image 2: Visual content (chart/infographic/diagram)"
        );

        assert_eq!(
            parse_course_references("Fast.ai Practical Deep Learning; CS229, ML"),
            vec!["Fast.ai Practical Deep Learning", "CS229"]
        );
        assert!(parse_course_references("N/A").is_empty());
    }

    #[tokio::test]
    async fn ai_answer_builds_item() {
        let provider = Arc::new(Scripted(Ok(
            "KNOWLEDGE: Hybrid retrieval with reranking halves latency.\nTOPIC: AI\n\
             COURSES: Stanford CS224N\nSUMMARY: Rerank a small candidate set.",
        )));
        let processor = ContentProcessor::new(provider, &Settings::default());
        let item = processor.process_post_content(&post(BODY)).await.unwrap();

        assert_eq!(item.topic, "AI");
        assert_eq!(item.category, Category::AiMachineLearning);
        assert_eq!(item.course_references, vec!["Stanford CS224N"]);
        assert_eq!(item.notes_applications, "Rerank a small candidate set.");
        assert_eq!(item.post_title, "RAG in production");
    }

    #[tokio::test]
    async fn provider_failure_uses_fallback() {
        let processor = ContentProcessor::new(Arc::new(Scripted(Err(()))), &Settings::default())
            .with_item_delay(Duration::ZERO);
        let mut second = post(BODY);
        second.title = String::new();

        let items = processor.batch_process_posts(&[post(BODY), second]).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].key_knowledge_content.contains("hybrid search"));
        assert!(!items[0].key_knowledge_content.contains("jane@example.com"));
        assert_eq!(items[1].post_title, "Here's how we cut retrieval latency in half with hybrid search");
    }
}
