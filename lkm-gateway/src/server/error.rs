//! HTTP error envelope.
//!
//! Every failure leaves the API as
//! `{error: true, message, status_code, error_code, path}`. Handlers return
//! [`ApiError`]; the request-context middleware fills in `path`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lkm_core::CoreError;
use lkm_db::DbError;
use lkm_knowledge::KnowledgeError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::errors::ProcessingError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid LinkedIn URL: {0}")]
    InvalidUrl(String),

    #[error("URL already processed: {0}")]
    AlreadyCached(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Processing already in progress")]
    AlreadyProcessing,

    #[error("Rate limit exceeded. Try again later.")]
    RateLimited,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidUrl(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::AlreadyCached(_) | ApiError::AlreadyProcessing => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable discriminant for clients.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidUrl(_) => "INVALID_URL",
            ApiError::AlreadyCached(_) => "ALREADY_CACHED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::AlreadyProcessing => "ALREADY_PROCESSING",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: bool,
    pub message: String,
    pub status_code: u16,
    pub error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorBody {
    /// Re-render with the request path filled in.
    pub fn with_path(mut self, path: &str) -> Response {
        self.path = Some(path.to_string());
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: true,
            message: self.to_string(),
            status_code: status.as_u16(),
            error_code: self.code(),
            path: None,
        };

        let mut response = (status, Json(body.clone())).into_response();
        response.extensions_mut().insert(body);
        response
    }
}

impl From<ProcessingError> for ApiError {
    fn from(err: ProcessingError) -> Self {
        match err {
            ProcessingError::InvalidUrl(url) => ApiError::InvalidUrl(url),
            ProcessingError::AlreadyProcessing => ApiError::AlreadyProcessing,
            ProcessingError::TaskNotFound(id) => ApiError::NotFound(format!("Task not found: {id}")),
            ProcessingError::Core(CoreError::Validation { field, value }) => {
                ApiError::BadRequest(format!("Invalid value for '{field}': {value}"))
            }
            other => {
                error!(error = %other, "Request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        error!(error = %err, "Cache error");
        ApiError::Internal(format!("Cache error: {err}"))
    }
}

impl From<KnowledgeError> for ApiError {
    fn from(err: KnowledgeError) -> Self {
        error!(error = %err, "Repository error");
        ApiError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
