//! Calls the real Gemini API. Run with
//! `GEMINI_API_KEY=... cargo test -p lkm-gateway --features live-tests`.
#![cfg(feature = "live-tests")]

use lkm_core::config::GeminiSettings;
use lkm_gateway::providers::{GeminiClient, HealthStatus, Provider};

fn client() -> GeminiClient {
    lkm_core::load_dotenv();
    let key = std::env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY must be set for live tests");
    GeminiClient::new(&key, &GeminiSettings::default()).unwrap()
}

#[tokio::test]
async fn test_live_health_check() {
    let health = client().health_check().await;
    assert_eq!(health.status, HealthStatus::Healthy, "{health:?}");
    assert!(health.api_connection);
}

#[tokio::test]
async fn test_live_generate_content() {
    let client = client();
    let reply = client
        .generate_content("Reply with the single word: hello")
        .await
        .unwrap();
    assert!(reply.to_lowercase().contains("hello"));

    let status = client.rate_limit_status().unwrap();
    assert_eq!(status.requests_this_minute, 1);
}
