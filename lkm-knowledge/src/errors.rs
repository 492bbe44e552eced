use std::path::PathBuf;

use lkm_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("image too large: {url} ({size_mb:.1} MB, limit {limit_mb} MB)")]
    ImageTooLarge {
        url: String,
        size_mb: f64,
        limit_mb: u64,
    },
    #[error("backup not found: {0}")]
    BackupNotFound(PathBuf),
    #[error("unknown knowledge item: {0}")]
    UnknownItem(String),
}

impl KnowledgeError {
    pub(crate) fn scraping(url: &str, status_code: Option<u16>, message: impl Into<String>) -> Self {
        KnowledgeError::Core(CoreError::Scraping {
            url: url.to_string(),
            status_code,
            message: message.into(),
        })
    }

    pub(crate) fn storage(path: &std::path::Path, operation: &str, message: impl ToString) -> Self {
        KnowledgeError::Core(CoreError::Storage {
            file_path: path.display().to_string(),
            operation: operation.to_string(),
            message: message.to_string(),
        })
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
