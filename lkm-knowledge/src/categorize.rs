//! Rule-based categorization and the helpers shared with the AI categorizer.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use lkm_core::Category;
use regex::Regex;
use serde::Serialize;

use crate::extractor::{title_case, truncate_with_ellipsis};

pub const HIGH_CONFIDENCE: f64 = 0.7;
/// AI answers below this confidence fall back to the keyword rules.
pub const MEDIUM_CONFIDENCE: f64 = 0.4;
pub const LOW_CONFIDENCE: f64 = 0.2;

struct Keywords {
    category: Category,
    primary: &'static [&'static str],
    secondary: &'static [&'static str],
}

const CATEGORY_KEYWORDS: [Keywords; 6] = [
    Keywords {
        category: Category::AiMachineLearning,
        primary: &[
            "artificial intelligence", "machine learning", "deep learning", "neural network",
            "ai", "ml", "nlp", "computer vision", "predictive analytics", "automation",
            "chatbot", "algorithm", "data science", "big data", "analytics",
        ],
        secondary: &[
            "intelligent", "automated", "prediction", "model", "training data",
            "supervised learning", "unsupervised learning", "reinforcement learning",
            "tensorflow", "pytorch", "scikit-learn", "pandas", "numpy",
        ],
    },
    Keywords {
        category: Category::SaasBusiness,
        primary: &[
            "saas", "software as a service", "subscription", "recurring revenue",
            "business model", "startup", "scale", "growth hacking", "product management",
            "customer acquisition", "retention", "churn", "lifetime value",
        ],
        secondary: &[
            "b2b", "b2c", "enterprise", "freemium", "pricing strategy", "market fit",
            "user onboarding", "feature adoption", "metrics", "kpi", "dashboard", "analytics",
            "conversion funnel",
        ],
    },
    Keywords {
        category: Category::MarketingSales,
        primary: &[
            "marketing", "sales", "lead generation", "conversion", "funnel",
            "customer journey", "branding", "content marketing", "seo", "sem",
            "social media marketing", "email marketing", "crm", "pipeline",
        ],
        secondary: &[
            "campaign", "roi", "ctr", "cpc", "cpm", "attribution", "segmentation",
            "personalization", "a/b testing", "landing page", "call to action",
            "lead scoring", "nurturing", "qualification", "closing",
        ],
    },
    Keywords {
        category: Category::LeadershipManagement,
        primary: &[
            "leadership", "management", "team building", "culture", "hiring",
            "performance management", "feedback", "coaching", "mentoring", "strategy",
            "decision making", "communication", "delegation",
        ],
        secondary: &[
            "employee engagement", "motivation", "productivity", "collaboration",
            "conflict resolution", "change management", "organizational", "remote work",
            "team dynamics", "goal setting", "accountability",
        ],
    },
    Keywords {
        category: Category::TechnologyTrends,
        primary: &[
            "technology", "innovation", "digital transformation", "cloud computing",
            "cybersecurity", "blockchain", "cryptocurrency", "iot", "api", "microservices",
            "devops", "agile", "scrum", "containerization",
        ],
        secondary: &[
            "emerging tech", "future trends", "disruption", "scalability", "infrastructure",
            "architecture", "integration", "deployment", "monitoring", "security",
            "compliance", "governance",
        ],
    },
    Keywords {
        category: Category::CourseContent,
        primary: &[
            "course", "training", "certification", "learning", "education", "workshop",
            "masterclass", "tutorial", "lesson", "curriculum", "bootcamp", "program",
            "academy", "university", "degree",
        ],
        secondary: &[
            "skill development", "professional development", "upskilling", "reskilling",
            "online learning", "e-learning", "mooc", "instructor", "student", "assessment",
            "certificate", "diploma",
        ],
    },
];

/// Keyword scoring: primary hits are worth 2, secondary hits 1, normalized by
/// keyword count and content length.
pub fn categorize_with_rules(content: &str) -> (Category, f64) {
    if content.is_empty() {
        return (Category::Other, 0.1);
    }
    let lower = content.to_lowercase();
    let words = lower.split_whitespace().count() as f64;

    let mut best: Option<(Category, f64)> = None;
    for keywords in &CATEGORY_KEYWORDS {
        let primary = keywords.primary.iter().filter(|k| lower.contains(*k)).count();
        let secondary = keywords.secondary.iter().filter(|k| lower.contains(*k)).count();
        let score = (primary * 2 + secondary) as f64;
        let total_keywords = (keywords.primary.len() + keywords.secondary.len()) as f64;
        let normalized = score / (total_keywords * 0.1 + words * 0.01);

        if normalized > 0.0 && best.is_none_or(|(_, current)| normalized > current) {
            best = Some((keywords.category, normalized));
        }
    }

    match best {
        Some((category, score)) => {
            let confidence = (score / 10.0).min(1.0);
            if confidence < LOW_CONFIDENCE {
                (Category::Other, confidence)
            } else {
                (category, confidence)
            }
        }
        None => (Category::Other, 0.1),
    }
}

static COURSE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:course|training|program|certification|masterclass|workshop|bootcamp)\s+(?:on|about|in|for)\s+([^.!?]{3,50})",
        r"([^.!?]{3,50})\s+(?:course|training|program|certification|masterclass|workshop|bootcamp)",
        r"(?:coursera|udemy|edx|linkedin learning|pluralsight|skillshare|udacity)\s+([^.!?]{3,50})",
        r"(?:university|college|academy|institute)\s+(?:of|for)\s+([^.!?]{3,50})",
        r"(?:bachelor|master|phd|doctorate)\s+(?:in|of)\s+([^.!?]{3,50})",
        r"(?:certified|certification)\s+(?:in|for)\s+([^.!?]{3,50})",
        r"([^.!?]{3,50})\s+(?:certified|certification)",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("course pattern"))
    .collect()
});
static COURSE_NOISE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s&-]").expect("course noise regex"));
static MULTI_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));
const COURSE_STOPWORDS: [&str; 9] = ["the", "and", "for", "with", "this", "that", "how", "what", "why"];

/// Course, platform, institution, degree and certification mentions, title-cased.
pub fn extract_course_references(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    let mut courses: Vec<String> = Vec::new();

    for pattern in COURSE_PATTERNS.iter() {
        for captures in pattern.captures_iter(&lower) {
            let Some(raw) = captures.get(1) else { continue };
            let stripped = COURSE_NOISE_RE.replace_all(raw.as_str().trim(), "");
            let course = MULTI_SPACE_RE.replace_all(&stripped, " ").trim().to_string();
            let length = course.chars().count();

            if (3..=100).contains(&length)
                && !course.chars().all(|c| c.is_ascii_digit())
                && !COURSE_STOPWORDS.contains(&course.as_str())
            {
                let titled = title_case(&course);
                if !courses.contains(&titled) {
                    courses.push(titled);
                }
            }
        }
    }
    courses
}

static SUMMARY_PATTERNS: LazyLock<Vec<(Category, Regex)>> = LazyLock::new(|| {
    let table: [(Category, &str); 18] = [
        (Category::AiMachineLearning, r"(?:ai|artificial intelligence|machine learning|ml)\s+(?:can|will|helps?|enables?)\s+([^.!?]+)"),
        (Category::AiMachineLearning, r"(?:algorithm|model|neural network)\s+(?:achieves?|improves?|reduces?)\s+([^.!?]+)"),
        (Category::AiMachineLearning, r"(?:predictive|analytics|automation)\s+(?:increases?|decreases?|optimizes?)\s+([^.!?]+)"),
        (Category::SaasBusiness, r"(?:saas|subscription|revenue)\s+(?:grows?|increases?|scales?)\s+([^.!?]+)"),
        (Category::SaasBusiness, r"(?:customer|user)\s+(?:acquisition|retention|engagement)\s+([^.!?]+)"),
        (Category::SaasBusiness, r"(?:business model|strategy)\s+(?:focuses?|emphasizes?|prioritizes?)\s+([^.!?]+)"),
        (Category::MarketingSales, r"(?:marketing|sales|campaign)\s+(?:generates?|converts?|increases?)\s+([^.!?]+)"),
        (Category::MarketingSales, r"(?:lead|conversion|roi)\s+(?:improves?|optimizes?|maximizes?)\s+([^.!?]+)"),
        (Category::MarketingSales, r"(?:customer journey|funnel)\s+(?:includes?|involves?|requires?)\s+([^.!?]+)"),
        (Category::LeadershipManagement, r"(?:leader|manager|team)\s+(?:should|must|needs? to)\s+([^.!?]+)"),
        (Category::LeadershipManagement, r"(?:leadership|management)\s+(?:involves?|requires?|focuses? on)\s+([^.!?]+)"),
        (Category::LeadershipManagement, r"(?:culture|performance)\s+(?:improves?|benefits? from|requires?)\s+([^.!?]+)"),
        (Category::TechnologyTrends, r"(?:technology|innovation|digital)\s+(?:transforms?|disrupts?|enables?)\s+([^.!?]+)"),
        (Category::TechnologyTrends, r"(?:cloud|api|microservices?)\s+(?:provides?|offers?|supports?)\s+([^.!?]+)"),
        (Category::TechnologyTrends, r"(?:future|trend|emerging)\s+(?:technology|innovation)\s+([^.!?]+)"),
        (Category::CourseContent, r"(?:course|training|learning)\s+(?:covers?|teaches?|includes?)\s+([^.!?]+)"),
        (Category::CourseContent, r"(?:students?|learners?)\s+(?:will learn|gain|develop)\s+([^.!?]+)"),
        (Category::CourseContent, r"(?:curriculum|program)\s+(?:focuses? on|emphasizes?|includes?)\s+([^.!?]+)"),
    ];
    table
        .into_iter()
        .map(|(category, p)| (category, Regex::new(&format!("(?i){p}")).expect("summary pattern")))
        .collect()
});
static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("sentence regex"));

/// Up to two category-flavoured insights, else the first substantial sentences.
pub fn generate_topic_summary(content: &str, category: Category) -> String {
    if content.is_empty() {
        return String::new();
    }

    let mut insights: Vec<String> = SUMMARY_PATTERNS
        .iter()
        .filter(|(c, _)| *c == category)
        .flat_map(|(_, pattern)| pattern.captures_iter(content))
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|insight| insight.len() > 10 && insight.len() < 200)
        .collect();

    if insights.is_empty() {
        insights = SENTENCE_END_RE
            .split(content)
            .take(3)
            .map(str::trim)
            .filter(|sentence| sentence.len() > 20)
            .map(str::to_string)
            .collect();
    }

    if insights.is_empty() {
        return truncate_with_ellipsis(content, 203);
    }
    let summary = insights.into_iter().take(2).collect::<Vec<_>>().join(". ");
    truncate_with_ellipsis(&summary, 303)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryShare {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryStatistics {
    pub total_items: usize,
    pub category_distribution: BTreeMap<String, CategoryShare>,
    pub most_common_category: Option<Category>,
    /// Distinct categories seen over all categories.
    pub diversity_score: f64,
}

pub fn get_category_statistics(categories: &[Category]) -> CategoryStatistics {
    if categories.is_empty() {
        return CategoryStatistics::default();
    }

    // first-seen order breaks ties for the most common category
    let mut counts: Vec<(Category, usize)> = Vec::new();
    for category in categories {
        match counts.iter_mut().find(|(c, _)| c == category) {
            Some((_, count)) => *count += 1,
            None => counts.push((*category, 1)),
        }
    }

    let total = categories.len();
    let mut most_common: Option<(Category, usize)> = None;
    for (category, count) in &counts {
        if most_common.is_none_or(|(_, best)| *count > best) {
            most_common = Some((*category, *count));
        }
    }

    CategoryStatistics {
        total_items: total,
        category_distribution: counts
            .iter()
            .map(|(category, count)| {
                (
                    category.as_str().to_string(),
                    CategoryShare {
                        count: *count,
                        percentage: *count as f64 / total as f64 * 100.0,
                    },
                )
            })
            .collect(),
        most_common_category: most_common.map(|(category, _)| category),
        diversity_score: counts.len() as f64 / Category::ALL.len() as f64,
    }
}

pub fn suggest_category_improvements(category: Category, confidence: f64) -> Vec<String> {
    let mut suggestions = Vec::new();
    if confidence < MEDIUM_CONFIDENCE {
        suggestions.push("Consider adding more specific keywords related to the main topic".to_string());
        suggestions.push("Ensure the content focuses on a single primary subject".to_string());
        if confidence < LOW_CONFIDENCE {
            suggestions.push("The content may be too general or contain mixed topics".to_string());
            suggestions.push("Consider splitting into multiple focused pieces".to_string());
        }
    }
    if category == Category::Other {
        suggestions.push("Try to identify the primary domain or industry focus".to_string());
        suggestions.push("Add more context about the specific field or application".to_string());
    }
    suggestions
}

/// Prompt asking the model for `CATEGORY:` / `CONFIDENCE:` / `REASONING:` lines.
pub fn categorization_prompt(content: &str) -> String {
    let categories = Category::ALL
        .iter()
        .filter(|c| **c != Category::Other)
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    let excerpt: String = content.chars().take(1000).collect();
    format!(
        "Analyze the following content and categorize it into one of these categories:\n\n\
         Categories:\n{categories}\n- Other\n\n\
         Content to analyze:\n{excerpt}\n\n\
         Instructions:\n\
         1. Choose the MOST RELEVANT category based on the main topic and focus of the content\n\
         2. Provide a confidence score from 0.0 to 1.0\n\
         3. Consider the primary subject matter, not just keywords\n\n\
         Response format:\n\
         CATEGORY: [category name]\n\
         CONFIDENCE: [0.0-1.0]\n\
         REASONING: [brief explanation]\n"
    )
}

/// Parse a model answer. Exact names keep the stated confidence, partial
/// names get 80% of it, anything else is `(Other, 0.3)`.
pub fn parse_ai_categorization(response: &str) -> (Category, f64) {
    let mut name: Option<String> = None;
    let mut confidence = 0.5;

    for line in response.trim().lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("CATEGORY:") {
            name = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("CONFIDENCE:") {
            confidence = rest.trim().parse().unwrap_or(0.5);
        }
    }

    let Some(name) = name.map(|n| n.to_lowercase()) else {
        return (Category::Other, 0.3);
    };
    if let Some(exact) = Category::ALL
        .into_iter()
        .find(|c| c.as_str().to_lowercase() == name)
    {
        return (exact, confidence);
    }
    if let Some(partial) = Category::ALL.into_iter().find(|c| {
        let display = c.as_str().to_lowercase();
        display.contains(&name) || name.contains(&display)
    }) {
        return (partial, confidence * 0.8);
    }
    (Category::Other, 0.3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_pick_leadership() {
        let content = "Leadership is about feedback, coaching and mentoring. \
                       Good management builds culture through delegation.";
        let (category, confidence) = categorize_with_rules(content);
        assert_eq!(category, Category::LeadershipManagement);
        assert!(confidence >= LOW_CONFIDENCE);
    }

    #[test]
    fn test_rules_without_keywords() {
        assert_eq!(categorize_with_rules(""), (Category::Other, 0.1));
        assert_eq!(categorize_with_rules("zzz qqq"), (Category::Other, 0.1));
    }

    #[test]
    fn test_weak_signal_is_other() {
        let (category, confidence) = categorize_with_rules("We met for lunch to discuss culture.");
        assert_eq!(category, Category::Other);
        assert!(confidence < LOW_CONFIDENCE);
    }

    #[test]
    fn test_course_references() {
        let courses = extract_course_references(
            "I took the coursera machine learning specialization. Also got a master in data science.",
        );
        assert!(courses.contains(&"Machine Learning Specialization".to_string()));
        assert!(courses.contains(&"Data Science".to_string()));
    }

    #[test]
    fn test_topic_summary_uses_category_patterns() {
        let summary = generate_topic_summary(
            "Machine learning can cut onboarding time in half. Nothing else here.",
            Category::AiMachineLearning,
        );
        assert_eq!(summary, "cut onboarding time in half");
    }

    #[test]
    fn test_topic_summary_falls_back_to_sentences() {
        let summary = generate_topic_summary(
            "Write things down before the meeting starts. Share the doc early with everyone.",
            Category::MarketingSales,
        );
        assert_eq!(
            summary,
            "Write things down before the meeting starts. Share the doc early with everyone"
        );
    }

    #[test]
    fn test_category_statistics() {
        let stats = get_category_statistics(&[
            Category::SaasBusiness,
            Category::Other,
            Category::SaasBusiness,
        ]);
        assert_eq!(stats.total_items, 3);
        assert_eq!(stats.most_common_category, Some(Category::SaasBusiness));
        assert_eq!(stats.category_distribution["SaaS & Business"].count, 2);
        assert!((stats.diversity_score - 2.0 / 7.0).abs() < 1e-9);
        assert_eq!(get_category_statistics(&[]).total_items, 0);
    }

    #[test]
    fn test_suggestions() {
        assert_eq!(suggest_category_improvements(Category::SaasBusiness, 0.9).len(), 0);
        assert_eq!(suggest_category_improvements(Category::SaasBusiness, 0.3).len(), 2);
        assert_eq!(suggest_category_improvements(Category::Other, 0.1).len(), 6);
    }

    #[test]
    fn test_parse_ai_categorization() {
        let exact = "CATEGORY: Marketing & Sales\nCONFIDENCE: 0.9\nREASONING: funnels";
        assert_eq!(parse_ai_categorization(exact), (Category::MarketingSales, 0.9));

        let (category, confidence) = parse_ai_categorization("CATEGORY: Marketing\nCONFIDENCE: 0.5");
        assert_eq!(category, Category::MarketingSales);
        assert!((confidence - 0.4).abs() < 1e-9);

        assert_eq!(parse_ai_categorization("no idea"), (Category::Other, 0.3));
        assert_eq!(
            parse_ai_categorization("CATEGORY: Gardening\nCONFIDENCE: 0.8"),
            (Category::Other, 0.3)
        );
    }

    #[test]
    fn test_prompt_lists_categories() {
        let prompt = categorization_prompt("Some content");
        assert!(prompt.contains("- AI & Machine Learning"));
        assert!(prompt.contains("CATEGORY: [category name]"));
        assert!(!prompt.contains("- Other\n- Other"));
    }
}
