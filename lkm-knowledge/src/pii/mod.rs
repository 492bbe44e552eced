//! PII detection, sanitization and the sanitizer service.

mod detector;
mod sanitizer;
mod service;

pub use detector::{PiiMatch, PiiType, detect_pii};
pub use sanitizer::{
    ConfidenceDistribution, HIGH_CONFIDENCE, PiiAnalysis, PiiSanitizer, Replacement, RiskLevel,
    SANITIZE_FLOOR, SafetyCheck, SanitizationStrategy, analyze_matches, analyze_text,
    detect_and_sanitize_pii, is_text_safe,
};
pub use service::{
    ContentSanitizer, DEFAULT_MIN_CONFIDENCE, SafetyValidation, SanitizationReport,
    SanitizationReportExport, SanitizationStats, SanitizerConfiguration,
};
