mod client;
mod rate_limiter;

pub use client::GeminiClient;
pub use rate_limiter::{RateLimitStatus, RateLimiter};
