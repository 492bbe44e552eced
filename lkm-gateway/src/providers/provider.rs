//! Provider trait for abstracting the text generation backend.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::providers::gemini::RateLimitStatus;

const CONNECTION_PROMPT: &str = "Hello, please respond with 'Connection successful'";

/// Provider error types
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("Content blocked: {0}")]
    ContentBlocked(String),
    #[error("Response blocked by safety filters")]
    SafetyBlocked,
    #[error("Empty response from model")]
    EmptyResponse,
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{provider} failed after {attempts} attempts: {last}")]
    Exhausted {
        provider: String,
        attempts: u32,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Stable upper-snake code used in logs and API payloads.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProviderError::ContentBlocked(_) => "CONTENT_BLOCKED",
            ProviderError::SafetyBlocked => "SAFETY_BLOCKED",
            ProviderError::EmptyResponse => "EMPTY_RESPONSE",
            ProviderError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            ProviderError::Exhausted { last, .. } => last.error_code(),
            ProviderError::HttpError(_)
            | ProviderError::ApiError { .. }
            | ProviderError::Serialization(_) => "API_ERROR",
        }
    }

    /// Blocked prompts fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::ContentBlocked(_) | ProviderError::SafetyBlocked
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of [`Provider::health_check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    pub api_connection: bool,
    pub rate_limits: Option<RateLimitStatus>,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Provider trait for text generation backends
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Current model
    fn model(&self) -> &str;

    /// Generate a completion for a single prompt.
    async fn generate_content(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Rate limiter snapshot, for providers that track one.
    fn rate_limit_status(&self) -> Option<RateLimitStatus> {
        None
    }

    /// Run prompts one after another. A failed prompt yields an empty string.
    async fn batch_generate(&self, prompts: &[String], delay: Duration) -> Vec<String> {
        let mut results = Vec::with_capacity(prompts.len());
        for (i, prompt) in prompts.iter().enumerate() {
            match self.generate_content(prompt).await {
                Ok(text) => results.push(text),
                Err(e) => {
                    warn!(provider = self.name(), index = i, error = %e, "batch prompt failed");
                    results.push(String::new());
                }
            }
            if i + 1 < prompts.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        results
    }

    async fn test_connection(&self) -> bool {
        match self.generate_content(CONNECTION_PROMPT).await {
            Ok(text) => is_connection_reply(&text),
            Err(e) => {
                warn!(provider = self.name(), error = %e, "connection test failed");
                false
            }
        }
    }

    async fn health_check(&self) -> ProviderHealth {
        let (status, api_connection, error) = match self.generate_content(CONNECTION_PROMPT).await
        {
            Ok(text) if is_connection_reply(&text) => (HealthStatus::Healthy, true, None),
            Ok(_) => (HealthStatus::Degraded, false, None),
            Err(e) => (HealthStatus::Unhealthy, false, Some(e.to_string())),
        };

        ProviderHealth {
            status,
            api_connection,
            rate_limits: self.rate_limit_status(),
            model: self.model().to_string(),
            timestamp: Utc::now(),
            error,
        }
    }
}

fn is_connection_reply(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("successful") || lower.contains("hello")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait::async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        async fn generate_content(&self, prompt: &str) -> Result<String, ProviderError> {
            if prompt == "fail" {
                return Err(ProviderError::EmptyResponse);
            }
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_batch_generate_blanks_failures() {
        let provider = Echo("ok");
        let prompts = vec!["a".to_string(), "fail".to_string(), "b".to_string()];
        let results = provider.batch_generate(&prompts, Duration::ZERO).await;
        assert_eq!(results, vec!["ok", "", "ok"]);
    }

    #[tokio::test]
    async fn test_health_check_states() {
        let healthy = Echo("Connection successful").health_check().await;
        assert_eq!(healthy.status, HealthStatus::Healthy);
        assert!(healthy.api_connection);
        assert_eq!(healthy.model, "echo-1");

        let degraded = Echo("something else").health_check().await;
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert!(!Echo("nope").test_connection().await);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ProviderError::SafetyBlocked.error_code(), "SAFETY_BLOCKED");
        assert_eq!(
            ProviderError::ApiError {
                status: 500,
                message: "boom".into()
            }
            .error_code(),
            "API_ERROR"
        );
        let exhausted = ProviderError::Exhausted {
            provider: "gemini".into(),
            attempts: 3,
            last: Box::new(ProviderError::QuotaExceeded("daily".into())),
        };
        assert_eq!(exhausted.error_code(), "QUOTA_EXCEEDED");
        assert!(!ProviderError::ContentBlocked("x".into()).is_retryable());
    }
}
