pub mod config;
pub mod errors;
pub mod models;
pub mod url_parser;

pub use config::{Config, ConfigError, Secrets, SecretsError, Settings, SettingsError, load_dotenv};
pub use errors::{CoreError, CoreResult};
pub use models::{Category, EngagementData, ImageData, KnowledgeItem, PostContent};
pub use url_parser::{LinkedInPostInfo, PostType};
