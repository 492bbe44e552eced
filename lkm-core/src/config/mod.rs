//! Configuration management for lkm.
//!
//! Secrets come from environment variables, settings from a TOML file with
//! environment overrides.
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - `GEMINI_API_KEY` - Google Gemini API key (required for processing)
//! - `API_SECRET_KEY` - optional shared secret for the HTTP API
//!
//! ## Settings (TOML File)
//! Located at `~/.config/lkm/config.toml` (override with `LKM_CONFIG_PATH`):
//! ```toml
//! [gemini]
//! model = "gemini-2.0-flash-exp"
//! rate_limit_rpm = 15
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//! ```

mod secrets;
mod settings;

use std::path::Path;

pub use secrets::{Secrets, SecretsError};
pub use settings::{
    GeminiSettings, LoggingSettings, MonitoringSettings, ProcessingSettings, ScrapingSettings,
    SecuritySettings, ServerSettings, Settings, SettingsError, StorageSettings,
};

/// Combined configuration containing both secrets and settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub secrets: Secrets,
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl Config {
    /// Load configuration from the default settings path.
    ///
    /// Fails when `GEMINI_API_KEY` is missing or the settings are invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let secrets = Secrets::from_env();
        let settings = Settings::load()?;
        Self::from_parts(secrets, settings)
    }

    /// Load configuration with settings from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let secrets = Secrets::from_env();
        let settings = Settings::load_from_path(path)?;
        Self::from_parts(secrets, settings)
    }

    pub fn from_parts(secrets: Secrets, settings: Settings) -> Result<Self, ConfigError> {
        secrets.require_gemini_key()?;
        settings.validate()?;
        Ok(Self { secrets, settings })
    }

    /// Get the Gemini API key (guaranteed present after loading).
    pub fn gemini_api_key(&self) -> &str {
        self.secrets.gemini_api_key.as_deref().unwrap_or_default()
    }

    pub fn bind_addr(&self) -> String {
        self.settings.bind_addr()
    }
}

/// Load `.env` into the process environment if present.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_requires_gemini_key() {
        let err = Config::from_parts(Secrets::default(), Settings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Secrets(_)));

        let secrets = Secrets {
            gemini_api_key: Some("key".to_string()),
            api_secret_key: None,
        };
        let config = Config::from_parts(secrets, Settings::default()).unwrap();
        assert_eq!(config.gemini_api_key(), "key");
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }
}
