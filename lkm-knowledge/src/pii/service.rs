//! Stateful sanitization service applied before content leaves the process.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lkm_core::{CoreError, KnowledgeItem};
use lkm_core::config::SecuritySettings;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::detector::{PiiMatch, PiiType, detect_pii};
use super::sanitizer::{
    PiiAnalysis, PiiSanitizer, RiskLevel, SanitizationStrategy, analyze_matches, is_text_safe,
};
use crate::errors::{KnowledgeError, KnowledgeResult};

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;
/// Confidence at which an SSN or card number makes content unsafe outright.
const HIGH_RISK_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SanitizationStats {
    pub total_processed: u64,
    pub pii_detected_count: u64,
    pub sanitizations_performed: u64,
    pub high_risk_content: u64,
    pub sanitization_rate: f64,
    pub pii_detection_rate: f64,
    pub high_risk_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    total_processed: u64,
    pii_detected_count: u64,
    sanitizations_performed: u64,
    high_risk_content: u64,
}

/// Outcome of sanitizing one piece of content. Never carries the raw PII.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizationReport {
    pub pii_detected: bool,
    pub sanitized: bool,
    pub match_count: usize,
    pub replacements_made: usize,
    pub pii_types: Vec<PiiType>,
    pub risk_level: RiskLevel,
    pub strategy: SanitizationStrategy,
    pub processing_time_ms: u64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyValidation {
    pub is_safe: bool,
    pub high_confidence_matches: usize,
    pub high_risk_pii_detected: bool,
    pub requires_immediate_sanitization: bool,
    pub content_length: usize,
    pub validation_timestamp: DateTime<Utc>,
    pub analysis: PiiAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizerConfiguration {
    pub pii_detection_enabled: bool,
    pub content_sanitization_enabled: bool,
    pub min_confidence_threshold: f64,
    pub default_strategy: SanitizationStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizationReportExport {
    pub report_timestamp: DateTime<Utc>,
    pub configuration: SanitizerConfiguration,
    pub statistics: SanitizationStats,
    pub recommendations: Vec<String>,
}

#[derive(Debug)]
struct Tuning {
    min_confidence: f64,
    strategy: SanitizationStrategy,
}

/// PII gatekeeper shared across tasks.
#[derive(Debug)]
pub struct ContentSanitizer {
    detection_enabled: bool,
    sanitize_enabled: bool,
    tuning: Mutex<Tuning>,
    sanitizer: PiiSanitizer,
    counters: Mutex<Counters>,
}

impl ContentSanitizer {
    pub fn new(security: &SecuritySettings) -> Self {
        Self {
            detection_enabled: security.enable_pii_detection,
            sanitize_enabled: security.sanitize_content,
            tuning: Mutex::new(Tuning {
                min_confidence: DEFAULT_MIN_CONFIDENCE,
                strategy: SanitizationStrategy::default(),
            }),
            sanitizer: PiiSanitizer::new(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Change the default strategy and threshold. The threshold must be in `0..=1`.
    pub fn configure(
        &self,
        strategy: SanitizationStrategy,
        min_confidence: f64,
    ) -> KnowledgeResult<()> {
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(KnowledgeError::Core(CoreError::validation(
                "min_confidence",
                min_confidence.to_string(),
            )));
        }
        let mut tuning = self.tuning.lock().unwrap_or_else(|p| p.into_inner());
        tuning.min_confidence = min_confidence;
        tuning.strategy = strategy;
        info!(strategy = %strategy, min_confidence, "Sanitization settings updated");
        Ok(())
    }

    fn tuning(&self) -> (f64, SanitizationStrategy) {
        let tuning = self.tuning.lock().unwrap_or_else(|p| p.into_inner());
        (tuning.min_confidence, tuning.strategy)
    }

    fn should_sanitize(&self, matches: &[PiiMatch], analysis: &PiiAnalysis, min: f64) -> bool {
        if !self.sanitize_enabled {
            return false;
        }
        matches
            .iter()
            .any(|m| m.pii_type.is_high_risk() && m.confidence >= 0.5)
            || analysis.risk_level == RiskLevel::High
            || matches.iter().any(|m| m.confidence >= min)
    }

    /// Sanitize free text. Returns the (possibly unchanged) text and a report.
    pub fn sanitize_content(&self, text: &str, context: &str) -> (String, SanitizationReport) {
        let started = Instant::now();
        let (min_confidence, strategy) = self.tuning();

        if !self.detection_enabled {
            return (
                text.to_string(),
                empty_report(strategy, started.elapsed().as_millis() as u64),
            );
        }

        let matches = detect_pii(text, context);
        let analysis = analyze_matches(&matches);
        let sanitize = self.should_sanitize(&matches, &analysis, min_confidence);

        let (output, replacements_made) = if sanitize {
            let eligible: Vec<PiiMatch> = matches
                .iter()
                .filter(|m| m.confidence >= min_confidence || m.pii_type.is_high_risk())
                .cloned()
                .collect();
            let (output, replacements) = self.sanitizer.sanitize_text(text, &eligible, strategy);
            (output, replacements.len())
        } else {
            (text.to_string(), 0)
        };

        self.record(!matches.is_empty(), replacements_made > 0, analysis.risk_level);
        if !matches.is_empty() {
            debug!(
                context,
                matches = matches.len(),
                replaced = replacements_made,
                "PII scan complete"
            );
        }

        let report = SanitizationReport {
            pii_detected: !matches.is_empty(),
            sanitized: replacements_made > 0,
            match_count: matches.len(),
            replacements_made,
            pii_types: analysis.pii_types_found.clone(),
            risk_level: analysis.risk_level,
            strategy,
            processing_time_ms: started.elapsed().as_millis() as u64,
            recommendations: analysis.recommendations,
        };
        (output, report)
    }

    /// Sanitize title, content, topic and course references of an item.
    /// Each field is scanned on its own so offsets always refer to that field.
    pub fn sanitize_knowledge_item(
        &self,
        item: &KnowledgeItem,
    ) -> (KnowledgeItem, SanitizationReport) {
        let started = Instant::now();
        let (_, strategy) = self.tuning();
        if !self.detection_enabled {
            return (
                item.clone(),
                empty_report(strategy, started.elapsed().as_millis() as u64),
            );
        }

        let mut replacements_made = 0;
        let mut sanitized = item.clone();
        for (field, name) in [
            (&mut sanitized.post_title, "post_title"),
            (&mut sanitized.key_knowledge_content, "content"),
            (&mut sanitized.topic, "topic"),
        ] {
            let (clean, replaced) = self.sanitize_field(field, name);
            *field = clean;
            replacements_made += replaced;
        }
        for course in &mut sanitized.course_references {
            let (clean, replaced) = self.sanitize_field(course, "course_reference");
            *course = clean;
            replacements_made += replaced;
        }

        let combined = [
            item.post_title.as_str(),
            item.key_knowledge_content.as_str(),
            item.topic.as_str(),
            item.course_references.join(" | ").as_str(),
        ]
        .join(" | ");
        let all_matches = detect_pii(&combined, "knowledge_item");
        let analysis = analyze_matches(&all_matches);

        self.record(
            !all_matches.is_empty(),
            replacements_made > 0,
            analysis.risk_level,
        );
        if replacements_made > 0 {
            warn!(
                knowledge_id = %item.id,
                replaced = replacements_made,
                "PII removed from knowledge item"
            );
        }

        let report = SanitizationReport {
            pii_detected: !all_matches.is_empty(),
            sanitized: replacements_made > 0,
            match_count: all_matches.len(),
            replacements_made,
            pii_types: analysis.pii_types_found,
            risk_level: analysis.risk_level,
            strategy,
            processing_time_ms: started.elapsed().as_millis() as u64,
            recommendations: analysis.recommendations,
        };
        (sanitized, report)
    }

    fn sanitize_field(&self, text: &str, field: &str) -> (String, usize) {
        let (min_confidence, strategy) = self.tuning();
        let matches = detect_pii(text, field);
        let analysis = analyze_matches(&matches);
        if !self.should_sanitize(&matches, &analysis, min_confidence) {
            return (text.to_string(), 0);
        }
        let eligible: Vec<PiiMatch> = matches
            .into_iter()
            .filter(|m| m.confidence >= min_confidence || m.pii_type.is_high_risk())
            .collect();
        let (output, replacements) = self.sanitizer.sanitize_text(text, &eligible, strategy);
        (output, replacements.len())
    }

    /// A stricter check than sanitization: any SSN or card number above 0.7
    /// makes the content unsafe.
    pub fn validate_content_safety(&self, text: &str) -> SafetyValidation {
        let check = is_text_safe(text, 0);
        let high_risk = detect_pii(text, "")
            .iter()
            .any(|m| m.pii_type.is_high_risk() && m.confidence >= HIGH_RISK_CONFIDENCE);
        SafetyValidation {
            is_safe: check.is_safe && !high_risk,
            high_confidence_matches: check.high_confidence_matches,
            high_risk_pii_detected: high_risk,
            requires_immediate_sanitization: high_risk,
            content_length: text.len(),
            validation_timestamp: Utc::now(),
            analysis: check.analysis,
        }
    }

    fn record(&self, detected: bool, sanitized: bool, risk: RiskLevel) {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        counters.total_processed += 1;
        if detected {
            counters.pii_detected_count += 1;
        }
        if sanitized {
            counters.sanitizations_performed += 1;
        }
        if risk == RiskLevel::High {
            counters.high_risk_content += 1;
        }
    }

    pub fn statistics(&self) -> SanitizationStats {
        let counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        let total = counters.total_processed.max(1) as f64;
        SanitizationStats {
            total_processed: counters.total_processed,
            pii_detected_count: counters.pii_detected_count,
            sanitizations_performed: counters.sanitizations_performed,
            high_risk_content: counters.high_risk_content,
            sanitization_rate: counters.sanitizations_performed as f64 / total * 100.0,
            pii_detection_rate: counters.pii_detected_count as f64 / total * 100.0,
            high_risk_rate: counters.high_risk_content as f64 / total * 100.0,
        }
    }

    pub fn reset_statistics(&self) {
        *self.counters.lock().unwrap_or_else(|p| p.into_inner()) = Counters::default();
        info!("Sanitization statistics reset");
    }

    pub fn export_sanitization_report(&self) -> SanitizationReportExport {
        let (min_confidence, strategy) = self.tuning();
        let statistics = self.statistics();

        let mut recommendations = Vec::new();
        if statistics.pii_detection_rate > 10.0 {
            recommendations.push(
                "High PII detection rate detected. Consider reviewing content sources."
                    .to_string(),
            );
        }
        if statistics.high_risk_rate > 5.0 {
            recommendations.push(
                "High-risk PII detected frequently. Implement additional content filtering."
                    .to_string(),
            );
        }
        if statistics.sanitization_rate < 50.0 && statistics.pii_detection_rate > 5.0 {
            recommendations.push(
                "Consider lowering confidence threshold for more aggressive sanitization."
                    .to_string(),
            );
        }
        if statistics.total_processed > 100 && statistics.sanitizations_performed == 0 {
            recommendations.push(
                "No sanitizations performed. Verify PII detection is working correctly."
                    .to_string(),
            );
        }

        SanitizationReportExport {
            report_timestamp: Utc::now(),
            configuration: SanitizerConfiguration {
                pii_detection_enabled: self.detection_enabled,
                content_sanitization_enabled: self.sanitize_enabled,
                min_confidence_threshold: min_confidence,
                default_strategy: strategy,
            },
            statistics,
            recommendations,
        }
    }
}

fn empty_report(strategy: SanitizationStrategy, elapsed_ms: u64) -> SanitizationReport {
    SanitizationReport {
        pii_detected: false,
        sanitized: false,
        match_count: 0,
        replacements_made: 0,
        pii_types: Vec::new(),
        risk_level: RiskLevel::Low,
        strategy,
        processing_time_ms: elapsed_ms,
        recommendations: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lkm_core::Category;

    fn security(enable_pii_detection: bool, sanitize_content: bool) -> SecuritySettings {
        SecuritySettings {
            enable_pii_detection,
            sanitize_content,
        }
    }

    fn item(content: &str) -> KnowledgeItem {
        KnowledgeItem::new(
            "Hiring pipelines",
            "How we hire engineers",
            content,
            "",
            "https://www.linkedin.com/posts/acme_hiring-activity-7100000000000000001-abcd",
            "",
            Category::LeadershipManagement,
            vec!["Contact jordan.lee@acme.io for the course".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_sanitize_content_masks_email() {
        let sanitizer = ContentSanitizer::new(&security(true, true));
        let (out, report) = sanitizer.sanitize_content("Email me: jordan.lee@acme.io", "post");
        assert_eq!(out, "Email me: j*********@a***.io");
        assert!(report.pii_detected);
        assert!(report.sanitized);
        assert_eq!(report.risk_level, RiskLevel::High);
        assert_eq!(report.pii_types, vec![PiiType::Email]);
    }

    #[test]
    fn test_clean_text_passes_through() {
        let sanitizer = ContentSanitizer::new(&security(true, true));
        let text = "Small pull requests get reviewed faster.";
        let (out, report) = sanitizer.sanitize_content(text, "post");
        assert_eq!(out, text);
        assert!(!report.pii_detected);
        assert_eq!(sanitizer.statistics().total_processed, 1);
    }

    #[test]
    fn test_detection_only_mode_leaves_text() {
        let sanitizer = ContentSanitizer::new(&security(true, false));
        let text = "Email me: jordan.lee@acme.io";
        let (out, report) = sanitizer.sanitize_content(text, "post");
        assert_eq!(out, text);
        assert!(report.pii_detected);
        assert!(!report.sanitized);
    }

    #[test]
    fn test_disabled_detection_skips_scan() {
        let sanitizer = ContentSanitizer::new(&security(false, true));
        let (_, report) = sanitizer.sanitize_content("SSN 123-45-6789", "post");
        assert!(!report.pii_detected);
        assert_eq!(sanitizer.statistics().total_processed, 0);
    }

    #[test]
    fn test_sanitize_knowledge_item_fields() {
        let sanitizer = ContentSanitizer::new(&security(true, true));
        sanitizer
            .configure(SanitizationStrategy::Placeholder, 0.6)
            .unwrap();
        let original = item("Structured interviews work. SSN 123-45-6789 was in the deck.");
        let (clean, report) = sanitizer.sanitize_knowledge_item(&original);

        assert_eq!(
            clean.key_knowledge_content,
            "Structured interviews work. SSN [SSN] was in the deck."
        );
        assert_eq!(
            clean.course_references,
            vec!["Contact [EMAIL_ADDRESS] for the course".to_string()]
        );
        assert_eq!(clean.post_title, original.post_title);
        assert_eq!(report.replacements_made, 2);
        assert_eq!(report.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_validate_content_safety_flags_ssn() {
        let sanitizer = ContentSanitizer::new(&security(true, true));
        let verdict = sanitizer.validate_content_safety("SSN 123-45-6789");
        assert!(!verdict.is_safe);
        assert!(verdict.high_risk_pii_detected);
        assert!(verdict.requires_immediate_sanitization);
        assert_eq!(verdict.content_length, 15);

        assert!(sanitizer.validate_content_safety("Ship it.").is_safe);
    }

    #[test]
    fn test_statistics_rates_and_reset() {
        let sanitizer = ContentSanitizer::new(&security(true, true));
        sanitizer.sanitize_content("SSN 123-45-6789", "a");
        sanitizer.sanitize_content("nothing to see", "b");

        let stats = sanitizer.statistics();
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.pii_detection_rate, 50.0);
        assert_eq!(stats.sanitization_rate, 50.0);
        assert_eq!(stats.high_risk_rate, 50.0);

        let report = sanitizer.export_sanitization_report();
        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(report.configuration.min_confidence_threshold, 0.6);

        sanitizer.reset_statistics();
        assert_eq!(sanitizer.statistics(), SanitizationStats::default());
    }

    #[test]
    fn test_configure_rejects_out_of_range() {
        let sanitizer = ContentSanitizer::new(&security(true, true));
        assert!(sanitizer.configure(SanitizationStrategy::Hash, 1.5).is_err());
        assert!(sanitizer.configure(SanitizationStrategy::Hash, 0.9).is_ok());
        assert_eq!(
            sanitizer.export_sanitization_report().configuration.default_strategy,
            SanitizationStrategy::Hash
        );
    }
}
