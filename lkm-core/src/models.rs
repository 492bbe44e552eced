//! Domain models: scraped posts and the knowledge items extracted from them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CoreError, CoreResult};

/// Closed set of knowledge categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Category {
    AiMachineLearning,
    SaasBusiness,
    MarketingSales,
    LeadershipManagement,
    TechnologyTrends,
    CourseContent,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::AiMachineLearning,
        Category::SaasBusiness,
        Category::MarketingSales,
        Category::LeadershipManagement,
        Category::TechnologyTrends,
        Category::CourseContent,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::AiMachineLearning => "AI & Machine Learning",
            Category::SaasBusiness => "SaaS & Business",
            Category::MarketingSales => "Marketing & Sales",
            Category::LeadershipManagement => "Leadership & Management",
            Category::TechnologyTrends => "Technology Trends",
            Category::CourseContent => "Course Content",
            Category::Other => "Other",
        }
    }

    /// Case-insensitive lookup by display name. Unknown names map to `Other`.
    pub fn from_string(value: &str) -> Self {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(value))
            .unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        Category::from_string(&value)
    }
}

impl From<Category> for &'static str {
    fn from(value: Category) -> Self {
        value.as_str()
    }
}

/// A processed unit of knowledge extracted from one LinkedIn post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub topic: String,
    pub post_title: String,
    pub key_knowledge_content: String,
    #[serde(default)]
    pub infographic_summary: String,
    pub source_link: String,
    #[serde(default)]
    pub notes_applications: String,
    pub category: Category,
    #[serde(default)]
    pub course_references: Vec<String>,
    pub extraction_date: DateTime<Utc>,
}

impl KnowledgeItem {
    /// Build a new item with a fresh id and the current timestamp.
    ///
    /// Fails when any of the required text fields is empty.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: impl Into<String>,
        post_title: impl Into<String>,
        key_knowledge_content: impl Into<String>,
        infographic_summary: impl Into<String>,
        source_link: impl Into<String>,
        notes_applications: impl Into<String>,
        category: Category,
        course_references: Vec<String>,
    ) -> CoreResult<Self> {
        let item = Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            post_title: post_title.into(),
            key_knowledge_content: key_knowledge_content.into(),
            infographic_summary: infographic_summary.into(),
            source_link: source_link.into(),
            notes_applications: notes_applications.into(),
            category,
            course_references,
            extraction_date: Utc::now(),
        };
        item.validate()?;
        Ok(item)
    }

    pub fn validate(&self) -> CoreResult<()> {
        require_non_empty("topic", &self.topic)?;
        require_non_empty("post_title", &self.post_title)?;
        require_non_empty("key_knowledge_content", &self.key_knowledge_content)?;
        require_non_empty("source_link", &self.source_link)?;
        Ok(())
    }

    pub fn has_course_references(&self) -> bool {
        !self.course_references.is_empty()
    }

    pub fn has_infographics(&self) -> bool {
        !self.infographic_summary.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub local_path: Option<String>,
}

impl ImageData {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> CoreResult<Self> {
        let image = Self {
            url: url.into(),
            filename: filename.into(),
            alt_text: None,
            description: None,
            local_path: None,
        };
        image.validate()?;
        Ok(image)
    }

    pub fn with_alt_text(mut self, alt_text: impl Into<String>) -> Self {
        let alt_text = alt_text.into();
        self.description = Some(alt_text.clone());
        self.alt_text = Some(alt_text);
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        require_non_empty("image.url", &self.url)?;
        require_non_empty("image.filename", &self.filename)
    }
}

/// Engagement counters. Unsigned, so negative counts cannot be constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementData {
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub reactions: u64,
}

/// Raw content of a scraped LinkedIn post or article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostContent {
    pub url: String,
    pub title: String,
    pub body_text: String,
    pub author: String,
    #[serde(default)]
    pub post_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Vec<ImageData>,
    #[serde(default)]
    pub engagement_metrics: EngagementData,
}

impl PostContent {
    pub fn validate(&self) -> CoreResult<()> {
        require_non_empty("url", &self.url)?;
        require_non_empty("body_text", &self.body_text)?;
        require_non_empty("author", &self.author)?;
        for image in &self.images {
            image.validate()?;
        }
        Ok(())
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

fn require_non_empty(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(field, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_from_string_is_case_insensitive() {
        assert_eq!(
            Category::from_string("ai & machine learning"),
            Category::AiMachineLearning
        );
        assert_eq!(Category::from_string("SAAS & BUSINESS"), Category::SaasBusiness);
        assert_eq!(Category::from_string("gardening"), Category::Other);
    }

    #[test]
    fn category_serializes_as_display_name() {
        let json = serde_json::to_string(&Category::MarketingSales).unwrap();
        assert_eq!(json, "\"Marketing & Sales\"");
        let parsed: Category = serde_json::from_str("\"technology trends\"").unwrap();
        assert_eq!(parsed, Category::TechnologyTrends);
    }

    #[test]
    fn knowledge_item_requires_fields() {
        let err = KnowledgeItem::new(
            "",
            "Title",
            "Content",
            "",
            "https://www.linkedin.com/posts/a_b",
            "",
            Category::Other,
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref field, .. } if field == "topic"));
    }

    #[test]
    fn knowledge_item_flags() {
        let item = KnowledgeItem::new(
            "AI",
            "Title",
            "Content",
            "  ",
            "https://www.linkedin.com/posts/a_b",
            "",
            Category::AiMachineLearning,
            vec!["Rust Basics".to_string()],
        )
        .unwrap();
        assert!(item.has_course_references());
        assert!(!item.has_infographics());
        assert_eq!(item.id.len(), 36);
    }

    #[test]
    fn post_content_validation() {
        let post = PostContent {
            url: "https://www.linkedin.com/posts/a_b".to_string(),
            title: "t".to_string(),
            body_text: String::new(),
            author: "Jane".to_string(),
            post_date: None,
            images: vec![],
            engagement_metrics: EngagementData::default(),
        };
        assert!(post.validate().is_err());
        assert!(ImageData::new("", "x.jpg").is_err());
    }
}
