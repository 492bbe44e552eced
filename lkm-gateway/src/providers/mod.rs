pub mod gemini;
pub mod prompts;
pub mod provider;

pub use gemini::{GeminiClient, RateLimitStatus, RateLimiter};
pub use prompts::PromptTemplate;
pub use provider::{HealthStatus, Provider, ProviderError, ProviderHealth};
