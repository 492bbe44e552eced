//! Google Gemini API client.

use std::sync::Arc;
use std::time::Duration;

use lkm_core::config::GeminiSettings;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::providers::gemini::{RateLimitStatus, RateLimiter};
use crate::providers::provider::{Provider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_ATTEMPTS: u32 = 3;
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Gemini API client
#[derive(Clone)]
pub struct GeminiClient {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    retry_delay: Duration,
    rate_limiter: Arc<RateLimiter>,
}

/// Request body for the Gemini generateContent API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

/// Generation configuration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

/// Response from the generateContent API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GeminiClient {
    /// Create a new Gemini client with its own rate limiter.
    pub fn new(api_key: impl Into<String>, settings: &GeminiSettings) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            model: settings.model.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
            retry_delay: Duration::from_secs(1),
            rate_limiter: Arc::new(RateLimiter::new(
                settings.rate_limit_rpm,
                settings.rate_limit_rpd,
                settings.max_tokens_per_day,
            )),
        })
    }

    /// Point the client at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Base delay between attempts; attempt `n` waits `delay * 2^n`.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    async fn call(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request_body = GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![TextPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.8,
                top_k: 40,
                max_output_tokens: 2048,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(classify_failure(status, response_text));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&response_text)?;
        extract_text(parsed)
    }
}

#[async_trait::async_trait]
impl Provider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_content(&self, prompt: &str) -> Result<String, ProviderError> {
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            self.rate_limiter.wait_if_needed().await;

            match self.call(prompt).await {
                Ok(text) => {
                    let tokens = estimate_tokens(prompt, &text);
                    self.rate_limiter.record_request(tokens);
                    debug!(model = %self.model, tokens, attempt, "gemini request succeeded");
                    return Ok(text);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(model = %self.model, code = e.error_code(), "gemini refused prompt");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        code = e.error_code(),
                        error = %e,
                        "gemini request failed"
                    );
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay * 2u32.pow(attempt)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(ProviderError::Exhausted {
            provider: "Gemini API".to_string(),
            attempts: MAX_ATTEMPTS,
            last: Box::new(last_error.unwrap_or(ProviderError::EmptyResponse)),
        })
    }

    fn rate_limit_status(&self) -> Option<RateLimitStatus> {
        Some(self.rate_limiter.status())
    }
}

fn classify_failure(status: StatusCode, body: String) -> ProviderError {
    let lower = body.to_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS || lower.contains("quota") || lower.contains("limit") {
        ProviderError::QuotaExceeded(body)
    } else if lower.contains("safety") {
        ProviderError::SafetyBlocked
    } else {
        ProviderError::ApiError {
            status: status.as_u16(),
            message: body,
        }
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, ProviderError> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(ProviderError::ContentBlocked(reason));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(ProviderError::EmptyResponse)?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(ProviderError::SafetyBlocked);
    }

    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text.trim().to_string())
}

/// Rough token count: words in plus words out.
fn estimate_tokens(prompt: &str, response: &str) -> u64 {
    (prompt.split_whitespace().count() + response.split_whitespace().count()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<String, ProviderError> {
        extract_text(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let text = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"KNOWLEDGE: a"},{"text":"\nTOPIC: AI"}],"role":"model"},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(text, "KNOWLEDGE: a\nTOPIC: AI");
    }

    #[test]
    fn test_extract_text_failures() {
        let blocked = parse(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#).unwrap_err();
        assert_eq!(blocked.error_code(), "CONTENT_BLOCKED");

        let safety = parse(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap_err();
        assert_eq!(safety.error_code(), "SAFETY_BLOCKED");

        let empty = parse(r#"{"candidates":[]}"#).unwrap_err();
        assert_eq!(empty.error_code(), "EMPTY_RESPONSE");

        let blank = parse(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#).unwrap_err();
        assert_eq!(blank.error_code(), "EMPTY_RESPONSE");
    }

    #[test]
    fn test_classify_failure() {
        let quota = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert_eq!(quota.error_code(), "QUOTA_EXCEEDED");

        let limit = classify_failure(StatusCode::FORBIDDEN, "Daily limit reached".into());
        assert_eq!(limit.error_code(), "QUOTA_EXCEEDED");

        let other = classify_failure(StatusCode::BAD_GATEWAY, "upstream".into());
        assert!(matches!(other, ProviderError::ApiError { status: 502, .. }));
    }

    #[test]
    fn test_estimate_tokens_counts_words() {
        assert_eq!(estimate_tokens("one two three", "four five"), 5);
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![TextPart { text: "hi".into() }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.8,
                top_k: 40,
                max_output_tokens: 2048,
            },
            safety_settings: vec![SafetySetting {
                category: SAFETY_CATEGORIES[0],
                threshold: "BLOCK_MEDIUM_AND_ABOVE",
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(value["generationConfig"]["topK"], 40);
        assert_eq!(value["safetySettings"][0]["category"], "HARM_CATEGORY_HARASSMENT");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
    }
}
