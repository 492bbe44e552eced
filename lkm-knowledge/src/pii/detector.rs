//! Regex-based PII detection with confidence scoring.

use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Matches at or below this confidence are discarded.
const MIN_DETECTION_CONFIDENCE: f64 = 0.1;
const CONTEXT_RADIUS: usize = 50;

const WHITELIST_DOMAINS: [&str; 7] = [
    "example.com",
    "test.com",
    "sample.com",
    "demo.com",
    "placeholder.com",
    "yourcompany.com",
    "company.com",
];
const PLACEHOLDER_WORDS: [&str; 3] = ["example", "test", "sample"];
const FAKE_PHONES: [&str; 3] = ["123-456-7890", "555-555-5555", "000-000-0000"];
const PRIVATE_IPV4_PREFIXES: [&str; 4] = ["192.168.", "10.", "172.16.", "127."];
const PII_CONTEXT_WORDS: [&str; 6] = ["contact", "email", "phone", "call", "reach", "address"];
const NON_PII_CONTEXT_WORDS: [&str; 5] = ["example", "sample", "demo", "test", "placeholder"];
const COMMON_NAMES: [&str; 27] = [
    "john", "jane", "michael", "sarah", "david", "lisa", "robert", "mary", "james", "patricia",
    "william", "jennifer", "richard", "elizabeth", "smith", "johnson", "williams", "brown",
    "jones", "garcia", "miller", "davis", "rodriguez", "martinez", "hernandez", "lopez",
    "gonzalez",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
    Url,
    PersonName,
    Address,
    DateOfBirth,
    LinkedinProfile,
    Custom,
}

impl PiiType {
    pub fn as_str(self) -> &'static str {
        match self {
            PiiType::Email => "email",
            PiiType::Phone => "phone",
            PiiType::Ssn => "ssn",
            PiiType::CreditCard => "credit_card",
            PiiType::IpAddress => "ip_address",
            PiiType::Url => "url",
            PiiType::PersonName => "person_name",
            PiiType::Address => "address",
            PiiType::DateOfBirth => "date_of_birth",
            PiiType::LinkedinProfile => "linkedin_profile",
            PiiType::Custom => "custom",
        }
    }

    /// SSNs and card numbers are always sanitized when seen.
    pub fn is_high_risk(self) -> bool {
        matches!(self, PiiType::Ssn | PiiType::CreditCard)
    }
}

impl fmt::Display for PiiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected PII span. Offsets are byte offsets into the scanned text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiMatch {
    pub pii_type: PiiType,
    pub original_text: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
    #[serde(default)]
    pub context: String,
}

impl fmt::Display for PiiMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (confidence: {:.2})",
            self.pii_type, self.original_text, self.confidence
        )
    }
}

struct PatternSpec {
    pii_type: PiiType,
    regex: Regex,
    confidence: f64,
}

fn pattern(pii_type: PiiType, source: &str, confidence: f64, case_insensitive: bool) -> PatternSpec {
    PatternSpec {
        pii_type,
        regex: RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
            .expect("pii regex"),
        confidence,
    }
}

static PATTERNS: LazyLock<Vec<PatternSpec>> = LazyLock::new(|| {
    vec![
        pattern(
            PiiType::Email,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            0.9,
            true,
        ),
        pattern(
            PiiType::Phone,
            r"\b(?:\+?1[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})\b",
            0.8,
            true,
        ),
        // at least 7 digits so years and small counts are not phone numbers
        pattern(PiiType::Phone, r"\+?\b[1-9]\d{6,14}\b", 0.6, true),
        pattern(PiiType::Ssn, r"\b\d{3}-\d{2}-\d{4}\b", 0.95, true),
        pattern(PiiType::Ssn, r"\b\d{9}\b", 0.3, true),
        pattern(
            PiiType::CreditCard,
            r"\b(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|3[47][0-9]{13}|3[0-9]{13}|6(?:011|5[0-9]{2})[0-9]{12})\b",
            0.9,
            true,
        ),
        pattern(PiiType::IpAddress, r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b", 0.7, true),
        pattern(
            PiiType::IpAddress,
            r"\b(?:[0-9a-f]{1,4}:){7}[0-9a-f]{1,4}\b",
            0.8,
            true,
        ),
        pattern(
            PiiType::LinkedinProfile,
            r"linkedin\.com/in/[a-z0-9-]+",
            0.95,
            true,
        ),
        pattern(
            PiiType::DateOfBirth,
            r"\b(?:0[1-9]|1[0-2])[/-](?:0[1-9]|[12]\d|3[01])[/-](?:19|20)\d{2}\b",
            0.6,
            true,
        ),
        pattern(
            PiiType::DateOfBirth,
            r"\b(?:19|20)\d{2}[/-](?:0[1-9]|1[0-2])[/-](?:0[1-9]|[12]\d|3[01])\b",
            0.6,
            true,
        ),
        // capitalisation is the whole signal here
        pattern(PiiType::PersonName, r"\b[A-Z][a-z]+ [A-Z][a-z]+\b", 0.4, false),
    ]
});

/// Find PII in `text`, score each hit and drop overlapping weaker hits.
pub fn detect_pii(text: &str, context: &str) -> Vec<PiiMatch> {
    let mut matches = Vec::new();
    for spec in PATTERNS.iter() {
        for found in spec.regex.find_iter(text) {
            let confidence = score(
                spec.pii_type,
                found.as_str(),
                spec.confidence,
                text,
                found.start(),
            );
            if confidence > MIN_DETECTION_CONFIDENCE {
                matches.push(PiiMatch {
                    pii_type: spec.pii_type,
                    original_text: found.as_str().to_string(),
                    start: found.start(),
                    end: found.end(),
                    confidence,
                    context: context.to_string(),
                });
            }
        }
    }
    deduplicate(matches)
}

fn score(pii_type: PiiType, found: &str, base: f64, full_text: &str, position: usize) -> f64 {
    let mut confidence = base;
    let lower = found.to_lowercase();

    match pii_type {
        PiiType::Email => {
            if WHITELIST_DOMAINS.iter().any(|d| lower.contains(d)) {
                confidence *= 0.1;
            }
            if PLACEHOLDER_WORDS.iter().any(|w| lower.contains(w)) {
                confidence *= 0.1;
            }
        }
        PiiType::Phone => {
            if FAKE_PHONES.contains(&found) {
                confidence *= 0.1;
            }
            let mut distinct: Vec<char> = found.chars().filter(char::is_ascii_digit).collect();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() <= 2 {
                confidence *= 0.3;
            }
        }
        PiiType::PersonName => {
            let parts: Vec<&str> = lower.split_whitespace().collect();
            if let [first, last] = parts.as_slice() {
                if COMMON_NAMES.contains(first) && COMMON_NAMES.contains(last) {
                    confidence *= 1.5;
                } else {
                    confidence *= 0.8;
                }
            }
        }
        PiiType::IpAddress => {
            if PRIVATE_IPV4_PREFIXES.iter().any(|p| found.starts_with(p)) {
                confidence *= 0.5;
            }
        }
        _ => {}
    }

    let window = context_window(full_text, position, found.len()).to_lowercase();
    if PII_CONTEXT_WORDS.iter().any(|w| window.contains(w)) {
        confidence *= 1.2;
    }
    if NON_PII_CONTEXT_WORDS.iter().any(|w| window.contains(w)) {
        confidence *= 0.3;
    }

    confidence.min(1.0)
}

/// Up to 50 bytes either side of the match, widened to char boundaries.
fn context_window(text: &str, position: usize, len: usize) -> &str {
    let mut start = position.saturating_sub(CONTEXT_RADIUS);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (position + len + CONTEXT_RADIUS).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start..end]
}

fn deduplicate(mut matches: Vec<PiiMatch>) -> Vec<PiiMatch> {
    matches.sort_by_key(|m| (m.start, m.end));

    let mut kept: Vec<PiiMatch> = Vec::with_capacity(matches.len());
    for candidate in matches {
        let overlapping = kept
            .iter()
            .position(|existing| candidate.start < existing.end && candidate.end > existing.start);
        match overlapping {
            Some(index) => {
                if candidate.confidence > kept[index].confidence {
                    kept.remove(index);
                    kept.push(candidate);
                }
            }
            None => kept.push(candidate),
        }
    }
    kept
}
