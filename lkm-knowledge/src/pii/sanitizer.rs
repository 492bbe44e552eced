//! Replacement strategies and risk analysis for detected PII.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::detector::{PiiMatch, PiiType, detect_pii};

/// Matches below this confidence are never rewritten.
pub const SANITIZE_FLOOR: f64 = 0.5;
/// Confidence at which a match counts as high-confidence.
pub const HIGH_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizationStrategy {
    #[default]
    Mask,
    Hash,
    Placeholder,
    Consistent,
    Remove,
}

impl SanitizationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mask => "mask",
            Self::Hash => "hash",
            Self::Placeholder => "placeholder",
            Self::Consistent => "consistent",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for SanitizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SanitizationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mask" => Ok(Self::Mask),
            "hash" => Ok(Self::Hash),
            "placeholder" => Ok(Self::Placeholder),
            "consistent" => Ok(Self::Consistent),
            "remove" => Ok(Self::Remove),
            other => Err(format!("unknown sanitization strategy: {other}")),
        }
    }
}

/// What a single original value was replaced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replacement {
    pub replacement: String,
    pub pii_type: PiiType,
    pub confidence: f64,
    pub strategy: SanitizationStrategy,
}

/// Rewrites PII spans. The `consistent` strategy keeps a value-to-fake map
/// so the same input always maps to the same fake within one sanitizer.
#[derive(Debug, Default)]
pub struct PiiSanitizer {
    consistent: Mutex<HashMap<String, String>>,
}

impl PiiSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every match at or above [`SANITIZE_FLOOR`], back to front so
    /// earlier offsets stay valid. Returns the text and a map keyed by the
    /// original value.
    pub fn sanitize_text(
        &self,
        text: &str,
        matches: &[PiiMatch],
        strategy: SanitizationStrategy,
    ) -> (String, BTreeMap<String, Replacement>) {
        let mut ordered: Vec<&PiiMatch> = matches
            .iter()
            .filter(|m| m.confidence >= SANITIZE_FLOOR)
            .filter(|m| m.end <= text.len() && text.get(m.start..m.end) == Some(&m.original_text))
            .collect();
        ordered.sort_by(|a, b| b.start.cmp(&a.start));

        let mut output = text.to_string();
        let mut replacements = BTreeMap::new();
        for found in ordered {
            let replacement = self.replacement_for(found, strategy);
            output.replace_range(found.start..found.end, &replacement);
            replacements.insert(
                found.original_text.clone(),
                Replacement {
                    replacement,
                    pii_type: found.pii_type,
                    confidence: found.confidence,
                    strategy,
                },
            );
        }
        (output, replacements)
    }

    fn replacement_for(&self, found: &PiiMatch, strategy: SanitizationStrategy) -> String {
        match strategy {
            SanitizationStrategy::Mask => mask(found.pii_type, &found.original_text),
            SanitizationStrategy::Hash => hash_token(found.pii_type, &found.original_text),
            SanitizationStrategy::Placeholder => placeholder(found.pii_type).to_string(),
            SanitizationStrategy::Consistent => self.consistent_fake(found),
            SanitizationStrategy::Remove => String::new(),
        }
    }

    fn consistent_fake(&self, found: &PiiMatch) -> String {
        let key = format!("{}:{}", found.pii_type, found.original_text);
        let mut cache = self
            .consistent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = cache.get(&key) {
            return existing.clone();
        }
        let n = cache.len() + 1;
        let fake = match found.pii_type {
            PiiType::Email => format!("user{n}@example.com"),
            PiiType::Phone => format!("555-{n:03}-0000"),
            PiiType::PersonName => format!("Person {n}"),
            other => format!("[{}_{n}]", other.as_str().to_uppercase()),
        };
        cache.insert(key, fake.clone());
        fake
    }
}

fn stars(count: usize) -> String {
    "*".repeat(count)
}

fn mask_keep_first(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => format!("{first}{}", stars(chars.count())),
        None => String::new(),
    }
}

fn mask(pii_type: PiiType, value: &str) -> String {
    match pii_type {
        PiiType::Email => {
            if let Some((user, domain)) = value.split_once('@') {
                let masked_domain = match domain.split_once('.') {
                    Some((label, rest)) => format!("{}.{rest}", mask_keep_first(label)),
                    None => mask_keep_first(domain),
                };
                return format!("{}@{masked_domain}", mask_keep_first(user));
            }
        }
        PiiType::Phone => {
            let digit_count = value.chars().filter(char::is_ascii_digit).count();
            if digit_count >= 4 {
                let mut seen = 0;
                return value
                    .chars()
                    .map(|c| {
                        if c.is_ascii_digit() {
                            seen += 1;
                            if seen <= digit_count - 4 { '*' } else { c }
                        } else {
                            c
                        }
                    })
                    .collect();
            }
        }
        PiiType::PersonName => {
            return value
                .split_whitespace()
                .map(mask_keep_first)
                .collect::<Vec<_>>()
                .join(" ");
        }
        _ => {}
    }

    let chars: Vec<char> = value.chars().collect();
    match chars.as_slice() {
        [] => String::new(),
        [_] | [_, _] => stars(chars.len()),
        [first, middle @ .., last] => format!("{first}{}{last}", stars(middle.len())),
    }
}

fn hash_token(pii_type: PiiType, value: &str) -> String {
    let digest = hex::encode(Sha256::digest(value.as_bytes()));
    format!("[{}_{}]", pii_type.as_str().to_uppercase(), &digest[..8])
}

fn placeholder(pii_type: PiiType) -> &'static str {
    match pii_type {
        PiiType::Email => "[EMAIL_ADDRESS]",
        PiiType::Phone => "[PHONE_NUMBER]",
        PiiType::Ssn => "[SSN]",
        PiiType::CreditCard => "[CREDIT_CARD]",
        PiiType::IpAddress => "[IP_ADDRESS]",
        PiiType::PersonName => "[PERSON_NAME]",
        PiiType::Address => "[ADDRESS]",
        PiiType::DateOfBirth => "[DATE_OF_BIRTH]",
        PiiType::LinkedinProfile => "[LINKEDIN_PROFILE]",
        PiiType::Url => "[URL]",
        PiiType::Custom => "[PII]",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiAnalysis {
    pub total_matches: usize,
    pub high_confidence_matches: usize,
    pub pii_types_found: Vec<PiiType>,
    pub type_counts: BTreeMap<PiiType, usize>,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    pub confidence_distribution: ConfidenceDistribution,
}

pub fn analyze_matches(matches: &[PiiMatch]) -> PiiAnalysis {
    let mut type_counts: BTreeMap<PiiType, usize> = BTreeMap::new();
    let mut distribution = ConfidenceDistribution::default();
    for found in matches {
        *type_counts.entry(found.pii_type).or_default() += 1;
        if found.confidence >= HIGH_CONFIDENCE {
            distribution.high += 1;
        } else if found.confidence >= SANITIZE_FLOOR {
            distribution.medium += 1;
        } else {
            distribution.low += 1;
        }
    }

    let risk_level = if distribution.high > 0 {
        RiskLevel::High
    } else if matches.len() > 3 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    let mut recommendations = Vec::new();
    if type_counts.contains_key(&PiiType::Email) {
        recommendations.push("Consider removing or masking email addresses".to_string());
    }
    if type_counts.contains_key(&PiiType::Phone) {
        recommendations.push("Phone numbers detected - consider sanitization".to_string());
    }
    if type_counts.contains_key(&PiiType::Ssn) {
        recommendations.push("SSN detected - immediate sanitization required".to_string());
    }
    if type_counts.contains_key(&PiiType::CreditCard) {
        recommendations.push("Credit card number detected - remove immediately".to_string());
    }

    PiiAnalysis {
        total_matches: matches.len(),
        high_confidence_matches: distribution.high,
        pii_types_found: type_counts.keys().copied().collect(),
        type_counts,
        risk_level,
        recommendations,
        confidence_distribution: distribution,
    }
}

/// Detect and analyze in one step.
pub fn analyze_text(text: &str) -> PiiAnalysis {
    analyze_matches(&detect_pii(text, ""))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub is_safe: bool,
    pub high_confidence_matches: usize,
    pub analysis: PiiAnalysis,
}

/// Safe while the number of high-confidence matches stays within the limit.
pub fn is_text_safe(text: &str, max_high_confidence: usize) -> SafetyCheck {
    let analysis = analyze_text(text);
    SafetyCheck {
        is_safe: analysis.high_confidence_matches <= max_high_confidence,
        high_confidence_matches: analysis.high_confidence_matches,
        analysis,
    }
}

/// One-shot detection plus sanitization with a fresh sanitizer.
pub fn detect_and_sanitize_pii(
    text: &str,
    strategy: SanitizationStrategy,
    min_confidence: f64,
) -> (String, Vec<PiiMatch>) {
    let matches: Vec<PiiMatch> = detect_pii(text, "")
        .into_iter()
        .filter(|m| m.confidence >= min_confidence)
        .collect();
    let (sanitized, _) = PiiSanitizer::new().sanitize_text(text, &matches, strategy);
    (sanitized, matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(pii_type: PiiType, text: &str, start: usize, confidence: f64) -> PiiMatch {
        PiiMatch {
            pii_type,
            original_text: text.to_string(),
            start,
            end: start + text.len(),
            confidence,
            context: String::new(),
        }
    }

    #[test]
    fn test_mask_shapes() {
        assert_eq!(mask(PiiType::Email, "jordan@acme.io"), "j*****@a***.io");
        assert_eq!(mask(PiiType::Phone, "415-867-5309"), "***-***-5309");
        assert_eq!(mask(PiiType::PersonName, "Priya Raman"), "P**** R****");
        assert_eq!(mask(PiiType::IpAddress, "10.0.0.1"), "1******1");
        assert_eq!(mask(PiiType::Custom, "ab"), "**");
    }

    #[test]
    fn test_hash_token_format() {
        let token = hash_token(PiiType::Email, "jordan@acme.io");
        assert!(token.starts_with("[EMAIL_"));
        assert_eq!(token.len(), "[EMAIL_".len() + 8 + 1);
        assert_eq!(token, hash_token(PiiType::Email, "jordan@acme.io"));
    }

    #[test]
    fn test_sanitize_replaces_back_to_front() {
        let text = "mail jordan@acme.io or call 415-867-5309";
        let matches = vec![
            found(PiiType::Email, "jordan@acme.io", 5, 0.9),
            found(PiiType::Phone, "415-867-5309", 28, 0.8),
        ];
        let (out, replacements) =
            PiiSanitizer::new().sanitize_text(text, &matches, SanitizationStrategy::Placeholder);
        assert_eq!(out, "mail [EMAIL_ADDRESS] or call [PHONE_NUMBER]");
        assert_eq!(replacements.len(), 2);
        assert_eq!(replacements["jordan@acme.io"].replacement, "[EMAIL_ADDRESS]");
    }

    #[test]
    fn test_low_confidence_untouched() {
        let text = "Priya Raman";
        let matches = vec![found(PiiType::PersonName, text, 0, 0.32)];
        let (out, replacements) =
            PiiSanitizer::new().sanitize_text(text, &matches, SanitizationStrategy::Mask);
        assert_eq!(out, text);
        assert!(replacements.is_empty());
    }

    #[test]
    fn test_consistent_strategy_reuses_fakes() {
        let sanitizer = PiiSanitizer::new();
        let first = vec![found(PiiType::Email, "a@acme.io", 0, 0.9)];
        let second = vec![found(PiiType::Email, "b@acme.io", 0, 0.9)];
        let strategy = SanitizationStrategy::Consistent;

        assert_eq!(sanitizer.sanitize_text("a@acme.io", &first, strategy).0, "user1@example.com");
        assert_eq!(sanitizer.sanitize_text("b@acme.io", &second, strategy).0, "user2@example.com");
        assert_eq!(sanitizer.sanitize_text("a@acme.io", &first, strategy).0, "user1@example.com");
    }

    #[test]
    fn test_analysis_risk_levels() {
        let high = analyze_matches(&[found(PiiType::Ssn, "123-45-6789", 0, 0.95)]);
        assert_eq!(high.risk_level, RiskLevel::High);
        assert_eq!(high.recommendations.len(), 1);

        let names: Vec<PiiMatch> = (0..4)
            .map(|i| found(PiiType::PersonName, "Priya Raman", i * 20, 0.32))
            .collect();
        let medium = analyze_matches(&names);
        assert_eq!(medium.risk_level, RiskLevel::Medium);
        assert_eq!(medium.confidence_distribution.low, 4);

        assert_eq!(analyze_matches(&[]).risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_is_text_safe() {
        assert!(is_text_safe("Ship small PRs and review them quickly.", 0).is_safe);
        let check = is_text_safe("Reach me at jordan.lee@acme.io", 0);
        assert!(!check.is_safe);
        assert_eq!(check.high_confidence_matches, 1);
    }

    #[test]
    fn test_detect_and_sanitize_pii() {
        let (out, matches) = detect_and_sanitize_pii(
            "SSN 123-45-6789 on file",
            SanitizationStrategy::Placeholder,
            0.5,
        );
        assert_eq!(out, "SSN [SSN] on file");
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("HASH".parse::<SanitizationStrategy>().unwrap(), SanitizationStrategy::Hash);
        assert!("shred".parse::<SanitizationStrategy>().is_err());
    }
}
