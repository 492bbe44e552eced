//! Scraping, extraction, PII handling and storage for the LinkedIn knowledge base.

pub mod categorize;
pub mod errors;
pub mod extractor;
pub mod organizer;
pub mod pii;
pub mod repository;
pub mod scraper;
pub mod storage;

pub use categorize::{CategoryStatistics, categorize_with_rules};
pub use errors::{KnowledgeError, KnowledgeResult};
pub use extractor::{ExtractedKnowledge, extract_knowledge};
pub use organizer::{BackupKind, ExportFormat, FileOrganizer};
pub use pii::{ContentSanitizer, PiiMatch, PiiType, SanitizationStrategy, detect_pii};
pub use repository::{KnowledgeRepository, RepositoryManager, RepositoryStatistics};
pub use scraper::LinkedInScraper;
pub use storage::RepositoryIndex;
