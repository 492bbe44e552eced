//! Domain error taxonomy shared by every crate in the workspace.

/// Errors raised by the knowledge pipeline.
///
/// Each variant carries the context the caller needs to report or retry:
/// the failing URL for scraping, the processing stage, the file touched by
/// storage, and so on.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("scraping failed for {url}: {message}")]
    Scraping {
        url: String,
        status_code: Option<u16>,
        message: String,
    },

    #[error("processing failed at stage '{stage}': {message}")]
    Processing {
        content_id: Option<String>,
        stage: String,
        message: String,
    },

    #[error("storage {operation} failed for {file_path}: {message}")]
    Storage {
        file_path: String,
        operation: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{api_name} API error: {message}")]
    Api {
        api_name: String,
        error_code: Option<String>,
        message: String,
    },

    #[error("invalid value for '{field}': {value}")]
    Validation { field: String, value: String },
}

impl CoreError {
    pub fn validation(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Stable error-type label used to pick retry policies and group stats.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scraping { .. } => "scraping",
            Self::Processing { .. } => "processing",
            Self::Storage { .. } => "storage",
            Self::Configuration(_) => "configuration",
            Self::Api { .. } => "api",
            Self::Validation { .. } => "validation",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(CoreError::validation("url", "").kind(), "validation");
        let err = CoreError::Api {
            api_name: "Gemini".to_string(),
            error_code: Some("QUOTA_EXCEEDED".to_string()),
            message: "quota".to_string(),
        };
        assert_eq!(err.kind(), "api");
        assert_eq!(err.to_string(), "Gemini API error: quota");
    }
}
