//! Prompt templates sent to the text generation provider.

use std::fmt;
use std::str::FromStr;

const KNOWLEDGE_EXTRACTION: &str = "\
You are an expert content analyst. Extract the valuable knowledge and insights from the \
LinkedIn post below and leave out marketing language and promotional content.

Content to analyze:
{content}

Provide:
1. Key knowledge insights (facts, strategies, best practices)
2. The main topic or domain (AI, SaaS, Marketing, Leadership, Technology, ...)
3. Any course or educational references mentioned
4. A summary of the actionable takeaways

Only keep educational and informational content. Ignore calls to action, promotional \
language and engagement requests.

Response format:
KNOWLEDGE: [extracted knowledge content]
TOPIC: [main topic/domain]
COURSES: [any educational references]
SUMMARY: [brief summary of key takeaways]
";

const CONTENT_CATEGORIZATION: &str = "\
Categorize the following content into exactly one of these categories:
- AI & Machine Learning
- SaaS & Business
- Marketing & Sales
- Leadership & Management
- Technology Trends
- Course Content
- Other

Content: {content}

Respond with only the category name.
";

const INSIGHT_EXTRACTION: &str = "\
Extract the top 3-5 key insights from this content that would be valuable for business \
professionals:

Content: {content}

Write each insight as a bullet point and focus on actionable information, statistics, \
strategies or important concepts.
";

const COURSE_DETECTION: &str = "\
Identify any courses, training programs, certifications or other educational content \
mentioned in this text:

Content: {content}

List only the specific course or program names. If there are none, respond with \"None\".
";

/// Named prompt templates. Each contains a single `{content}` placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    KnowledgeExtraction,
    ContentCategorization,
    InsightExtraction,
    CourseDetection,
}

impl PromptTemplate {
    pub fn name(self) -> &'static str {
        match self {
            PromptTemplate::KnowledgeExtraction => "knowledge_extraction",
            PromptTemplate::ContentCategorization => "content_categorization",
            PromptTemplate::InsightExtraction => "insight_extraction",
            PromptTemplate::CourseDetection => "course_detection",
        }
    }

    pub fn template(self) -> &'static str {
        match self {
            PromptTemplate::KnowledgeExtraction => KNOWLEDGE_EXTRACTION,
            PromptTemplate::ContentCategorization => CONTENT_CATEGORIZATION,
            PromptTemplate::InsightExtraction => INSIGHT_EXTRACTION,
            PromptTemplate::CourseDetection => COURSE_DETECTION,
        }
    }

    pub fn render(self, content: &str) -> String {
        self.template().replace("{content}", content)
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PromptTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "knowledge_extraction" => Ok(PromptTemplate::KnowledgeExtraction),
            "content_categorization" => Ok(PromptTemplate::ContentCategorization),
            "insight_extraction" => Ok(PromptTemplate::InsightExtraction),
            "course_detection" => Ok(PromptTemplate::CourseDetection),
            other => Err(format!("unknown prompt template: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_content() {
        let prompt = PromptTemplate::KnowledgeExtraction.render("Vector search beats keyword search");
        assert!(prompt.contains("Vector search beats keyword search"));
        assert!(!prompt.contains("{content}"));
        assert!(prompt.contains("KNOWLEDGE:"));
        assert!(prompt.contains("SUMMARY:"));
    }

    #[test]
    fn test_template_names_round_trip() {
        for template in [
            PromptTemplate::KnowledgeExtraction,
            PromptTemplate::ContentCategorization,
            PromptTemplate::InsightExtraction,
            PromptTemplate::CourseDetection,
        ] {
            assert_eq!(template.name().parse::<PromptTemplate>(), Ok(template));
        }
        assert!("summarize".parse::<PromptTemplate>().is_err());
    }
}
