//! Secrets configuration loaded from environment variables only.
//!
//! API keys never live in the TOML settings file.

use std::env;

/// Secrets loaded exclusively from environment variables.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// Google Gemini API key (env: GEMINI_API_KEY)
    pub gemini_api_key: Option<String>,

    /// Optional shared secret for the HTTP API (env: API_SECRET_KEY)
    pub api_secret_key: Option<String>,
}

/// Errors that can occur when loading secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Missing required secret: {0}")]
    MissingSecret(String),
}

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// Also loads a `.env` file if present (development convenience).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env_inner()
    }

    pub(crate) fn from_env_inner() -> Self {
        Self {
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            api_secret_key: non_empty_var("API_SECRET_KEY"),
        }
    }

    /// The Gemini key, or an error naming the missing variable.
    pub fn require_gemini_key(&self) -> Result<&str, SecretsError> {
        self.gemini_api_key
            .as_deref()
            .ok_or_else(|| SecretsError::MissingSecret("GEMINI_API_KEY".to_string()))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
