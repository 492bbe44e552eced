use lkm_core::CoreError;
use lkm_db::DbError;
use lkm_knowledge::KnowledgeError;

use crate::providers::ProviderError;
use crate::retry::{Classify, ErrorKind};

/// Failures of the processing pipeline and the batch queue.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
    #[error("cache error: {0}")]
    Db(#[from] DbError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid LinkedIn URL: {0}")]
    InvalidUrl(String),
    #[error("Processing already in progress")]
    AlreadyProcessing,
    #[error("Task not found: {0}")]
    TaskNotFound(String),
}

impl ProcessingError {
    pub(crate) fn stage(stage: &str, content_id: Option<&str>, message: impl ToString) -> Self {
        ProcessingError::Core(CoreError::Processing {
            content_id: content_id.map(str::to_string),
            stage: stage.to_string(),
            message: message.to_string(),
        })
    }
}

pub type ProcessingResult<T> = Result<T, ProcessingError>;

impl Classify for CoreError {
    fn error_kind(&self) -> ErrorKind {
        ErrorKind::from_label(self.kind())
    }
}

impl Classify for KnowledgeError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            KnowledgeError::Core(core) => core.error_kind(),
            KnowledgeError::Http(_) => ErrorKind::Scraping,
            KnowledgeError::ImageTooLarge { .. } => ErrorKind::Validation,
            KnowledgeError::UnknownItem(_) => ErrorKind::Validation,
            KnowledgeError::Json(_) => ErrorKind::Processing,
            KnowledgeError::Io(_)
            | KnowledgeError::Sqlx(_)
            | KnowledgeError::Migrate(_)
            | KnowledgeError::BackupNotFound(_) => ErrorKind::Storage,
        }
    }
}

impl Classify for ProviderError {
    fn error_kind(&self) -> ErrorKind {
        ErrorKind::Api
    }
}

impl Classify for ProcessingError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Core(e) => e.error_kind(),
            ProcessingError::Knowledge(e) => e.error_kind(),
            ProcessingError::Provider(e) => e.error_kind(),
            ProcessingError::Db(_) | ProcessingError::Io(_) => ErrorKind::Storage,
            ProcessingError::Json(_) | ProcessingError::AlreadyProcessing => ErrorKind::Processing,
            ProcessingError::InvalidUrl(_) | ProcessingError::TaskNotFound(_) => {
                ErrorKind::Validation
            }
        }
    }
}
