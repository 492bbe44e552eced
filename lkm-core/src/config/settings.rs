//! Settings configuration loaded from TOML files.
//!
//! Non-sensitive configuration lives in `~/.config/lkm/config.toml`. Any field
//! can then be overridden by the environment variable of the same meaning
//! (`GEMINI_RATE_LIMIT_RPM`, `CACHE_DB_PATH`, ...), which keeps container
//! deployments working without a config file.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# lkm configuration file
# Located at: ~/.config/lkm/config.toml
#
# Secrets are loaded from environment variables (or a .env file):
#   - GEMINI_API_KEY
#   - API_SECRET_KEY (optional)

[gemini]
model = "gemini-2.0-flash-exp"
rate_limit_rpm = 15
rate_limit_rpd = 1500
max_tokens_per_day = 1000000

[storage]
knowledge_repo_path = "./knowledge_repository"
cache_db_path = "./cache/knowledge_cache.db"
max_cache_size_mb = 100

[scraping]
delay_seconds = 2.0
max_retries = 3
request_timeout_seconds = 30
user_agent = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
enable_image_download = true
max_image_size_mb = 10

[processing]
batch_size = 10
max_concurrent_requests = 5

[security]
enable_pii_detection = true
sanitize_content = true

[server]
host = "0.0.0.0"
port = 8000
cors_allow_origins = "*"
api_rate_limit_per_minute = 60

[logging]
level = "info"
# Mask emails, phone numbers and other PII in log lines
redact_pii = true

[monitoring]
enable_metrics_collection = true
health_check_interval_seconds = 30
"#;

/// Settings loaded from TOML configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub gemini: GeminiSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub scraping: ScrapingSettings,

    #[serde(default)]
    pub processing: ProcessingSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub monitoring: MonitoringSettings,
}

/// Gemini model and quota settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GeminiSettings {
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Requests allowed per rolling minute
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: u32,

    /// Requests allowed per day
    #[serde(default = "default_rate_limit_rpd")]
    pub rate_limit_rpd: u32,

    #[serde(default = "default_max_tokens_per_day")]
    pub max_tokens_per_day: u64,
}

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageSettings {
    #[serde(default = "default_knowledge_repo_path")]
    pub knowledge_repo_path: PathBuf,

    #[serde(default = "default_cache_db_path")]
    pub cache_db_path: PathBuf,

    #[serde(default = "default_max_cache_size_mb")]
    pub max_cache_size_mb: u64,
}

/// HTTP scraping behaviour
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScrapingSettings {
    /// Pause between two page fetches
    #[serde(default = "default_scraping_delay")]
    pub delay_seconds: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_true")]
    pub enable_image_download: bool,

    #[serde(default = "default_max_image_size_mb")]
    pub max_image_size_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProcessingSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent URL workers in the batch processor (1..=20)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SecuritySettings {
    #[serde(default = "default_true")]
    pub enable_pii_detection: bool,

    #[serde(default = "default_true")]
    pub sanitize_content: bool,
}

/// HTTP API server settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Comma separated list of allowed origins, or `*`
    #[serde(default = "default_cors_origins")]
    pub cors_allow_origins: String,

    #[serde(default = "default_api_rate_limit")]
    pub api_rate_limit_per_minute: u32,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_true")]
    pub redact_pii: bool,
}

/// Metrics and health monitoring
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitoringSettings {
    #[serde(default = "default_true")]
    pub enable_metrics_collection: bool,

    /// Seconds between two health checks of the running server
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}

fn default_rate_limit_rpm() -> u32 {
    15
}

fn default_rate_limit_rpd() -> u32 {
    1500
}

fn default_max_tokens_per_day() -> u64 {
    1_000_000
}

fn default_knowledge_repo_path() -> PathBuf {
    PathBuf::from("./knowledge_repository")
}

fn default_cache_db_path() -> PathBuf {
    PathBuf::from("./cache/knowledge_cache.db")
}

fn default_max_cache_size_mb() -> u64 {
    100
}

fn default_scraping_delay() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_image_size_mb() -> u64 {
    10
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrent() -> usize {
    5
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_cors_origins() -> String {
    "*".to_string()
}

fn default_api_rate_limit() -> u32 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_health_check_interval() -> u64 {
    30
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            model: default_gemini_model(),
            rate_limit_rpm: default_rate_limit_rpm(),
            rate_limit_rpd: default_rate_limit_rpd(),
            max_tokens_per_day: default_max_tokens_per_day(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            knowledge_repo_path: default_knowledge_repo_path(),
            cache_db_path: default_cache_db_path(),
            max_cache_size_mb: default_max_cache_size_mb(),
        }
    }
}

impl Default for ScrapingSettings {
    fn default() -> Self {
        Self {
            delay_seconds: default_scraping_delay(),
            max_retries: default_max_retries(),
            request_timeout_seconds: default_request_timeout(),
            user_agent: default_user_agent(),
            enable_image_download: true,
            max_image_size_mb: default_max_image_size_mb(),
        }
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enable_pii_detection: true,
            sanitize_content: true,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            cors_allow_origins: default_cors_origins(),
            api_rate_limit_per_minute: default_api_rate_limit(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            redact_pii: true,
        }
    }
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            enable_metrics_collection: true,
            health_check_interval_seconds: default_health_check_interval(),
        }
    }
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error("Invalid value '{value}' for {key}")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

impl Settings {
    /// Load settings from the TOML configuration file, then apply
    /// environment overrides.
    ///
    /// If the config file doesn't exist, creates it with default values.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load settings from an explicit path (used by `--config`).
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::info!("Creating default configuration at {:?}", path);
            Self::create_default_config(path)?;
        }

        let content = fs::read_to_string(path)?;
        let mut settings = Self::from_toml(&content)?;
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Serialize settings to TOML content.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The default TOML written on first start.
    pub fn default_toml() -> &'static str {
        DEFAULT_CONFIG_TOML
    }

    /// Get the configuration file path.
    ///
    /// Uses `LKM_CONFIG_PATH` when set, else `~/.config/lkm/config.toml`.
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_path) = std::env::var("LKM_CONFIG_PATH") {
            return Ok(PathBuf::from(override_path));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("lkm");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Save settings to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = self.to_toml()?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GEMINI_MODEL") {
            self.gemini.model = v;
        }
        override_parsed(&get, "GEMINI_RATE_LIMIT_RPM", &mut self.gemini.rate_limit_rpm)?;
        override_parsed(&get, "GEMINI_RATE_LIMIT_RPD", &mut self.gemini.rate_limit_rpd)?;
        override_parsed(
            &get,
            "GEMINI_MAX_TOKENS_PER_DAY",
            &mut self.gemini.max_tokens_per_day,
        )?;

        if let Some(v) = get("KNOWLEDGE_REPO_PATH") {
            self.storage.knowledge_repo_path = PathBuf::from(v);
        }
        if let Some(v) = get("CACHE_DB_PATH") {
            self.storage.cache_db_path = PathBuf::from(v);
        }
        override_parsed(&get, "MAX_CACHE_SIZE_MB", &mut self.storage.max_cache_size_mb)?;

        override_parsed(&get, "SCRAPING_DELAY_SECONDS", &mut self.scraping.delay_seconds)?;
        override_parsed(&get, "MAX_RETRIES", &mut self.scraping.max_retries)?;
        override_parsed(
            &get,
            "REQUEST_TIMEOUT_SECONDS",
            &mut self.scraping.request_timeout_seconds,
        )?;
        if let Some(v) = get("USER_AGENT") {
            self.scraping.user_agent = v;
        }
        override_bool(
            &get,
            "ENABLE_IMAGE_DOWNLOAD",
            &mut self.scraping.enable_image_download,
        );
        override_parsed(&get, "MAX_IMAGE_SIZE_MB", &mut self.scraping.max_image_size_mb)?;

        override_parsed(&get, "BATCH_SIZE", &mut self.processing.batch_size)?;
        override_parsed(
            &get,
            "MAX_CONCURRENT_REQUESTS",
            &mut self.processing.max_concurrent_requests,
        )?;

        override_bool(
            &get,
            "ENABLE_PII_DETECTION",
            &mut self.security.enable_pii_detection,
        );
        override_bool(&get, "SANITIZE_CONTENT", &mut self.security.sanitize_content);

        if let Some(v) = get("SERVER_HOST") {
            self.server.host = v;
        }
        override_parsed(&get, "SERVER_PORT", &mut self.server.port)?;
        if let Some(v) = get("CORS_ALLOW_ORIGINS") {
            self.server.cors_allow_origins = v;
        }
        override_parsed(
            &get,
            "API_RATE_LIMIT_REQUESTS_PER_MINUTE",
            &mut self.server.api_rate_limit_per_minute,
        )?;

        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.to_ascii_lowercase();
        }
        override_bool(&get, "REDACT_LOG_PII", &mut self.logging.redact_pii);

        override_bool(
            &get,
            "ENABLE_METRICS_COLLECTION",
            &mut self.monitoring.enable_metrics_collection,
        );
        override_parsed(
            &get,
            "HEALTH_CHECK_INTERVAL_SECONDS",
            &mut self.monitoring.health_check_interval_seconds,
        )?;

        Ok(())
    }

    /// Reject values the rest of the system cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.gemini.rate_limit_rpm == 0 || self.gemini.rate_limit_rpd == 0 {
            return Err(SettingsError::Invalid(
                "gemini rate limits must be greater than zero".to_string(),
            ));
        }
        if !(1..=20).contains(&self.processing.max_concurrent_requests) {
            return Err(SettingsError::Invalid(format!(
                "max_concurrent_requests must be between 1 and 20, got {}",
                self.processing.max_concurrent_requests
            )));
        }
        if self.scraping.request_timeout_seconds == 0 {
            return Err(SettingsError::Invalid(
                "request_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.monitoring.health_check_interval_seconds == 0 {
            return Err(SettingsError::Invalid(
                "health_check_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.scraping.delay_seconds < 0.0 {
            return Err(SettingsError::Invalid(
                "scraping delay cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the HTTP bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Allowed CORS origins; empty means any origin.
    pub fn cors_origins(&self) -> Vec<String> {
        self.server
            .cors_allow_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty() && *o != "*")
            .map(str::to_string)
            .collect()
    }
}

fn override_parsed<T, G>(get: &G, key: &str, target: &mut T) -> Result<(), SettingsError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| SettingsError::InvalidOverride {
                key: key.to_string(),
                value: raw.clone(),
            })?;
    }
    Ok(())
}

fn override_bool<G>(get: &G, key: &str, target: &mut bool)
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *target = raw.trim().eq_ignore_ascii_case("true");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.gemini.model, "gemini-2.0-flash-exp");
        assert_eq!(settings.gemini.rate_limit_rpm, 15);
        assert_eq!(settings.gemini.rate_limit_rpd, 1500);
        assert_eq!(
            settings.storage.cache_db_path,
            PathBuf::from("./cache/knowledge_cache.db")
        );
        assert_eq!(settings.scraping.max_retries, 3);
        assert!(settings.scraping.enable_image_download);
        assert_eq!(settings.processing.max_concurrent_requests, 5);
        assert!(settings.security.sanitize_content);
        assert_eq!(settings.bind_addr(), "0.0.0.0:8000");
        assert_eq!(settings.logging.level, "info");
        assert!(settings.cors_origins().is_empty());
        assert!(settings.logging.redact_pii);
        assert_eq!(settings.monitoring.health_check_interval_seconds, 30);
    }

    #[test]
    fn test_default_toml_matches_defaults() {
        let parsed = Settings::from_toml(Settings::default_toml()).unwrap();
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings = Settings::from_toml(
            r#"
[server]
port = 9000
cors_allow_origins = "http://a.test, http://b.test"
"#,
        )
        .unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.cors_origins(), vec!["http://a.test", "http://b.test"]);
        assert_eq!(settings.gemini.rate_limit_rpm, 15);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GEMINI_RATE_LIMIT_RPM", "30"),
            ("ENABLE_IMAGE_DOWNLOAD", "false"),
            ("CACHE_DB_PATH", "/tmp/cache.db"),
            ("LOG_LEVEL", "DEBUG"),
            ("SERVER_PORT", ""),
            ("ENABLE_METRICS_COLLECTION", "false"),
            ("HEALTH_CHECK_INTERVAL_SECONDS", "5"),
            ("REDACT_LOG_PII", "FALSE"),
        ]);
        let mut settings = Settings::default();
        settings
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.gemini.rate_limit_rpm, 30);
        assert!(!settings.scraping.enable_image_download);
        assert_eq!(settings.storage.cache_db_path, PathBuf::from("/tmp/cache.db"));
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.server.port, 8000);
        assert!(!settings.monitoring.enable_metrics_collection);
        assert_eq!(settings.monitoring.health_check_interval_seconds, 5);
        assert!(!settings.logging.redact_pii);
    }

    #[test]
    fn test_invalid_override_is_reported() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env_overrides(|key| (key == "MAX_RETRIES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidOverride { .. }));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.processing.max_concurrent_requests = 50;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.gemini.rate_limit_rpd = 0;
        assert!(settings.validate().is_err());

        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let settings = Settings::load_from_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(settings.server.api_rate_limit_per_minute, 60);
    }
}
