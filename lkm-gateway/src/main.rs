use std::sync::Arc;

use tracing::info;

use lkm_gateway::logging;
use lkm_gateway::providers::GeminiClient;
use lkm_gateway::server;
use lkm_gateway::state::AppState;
use lkm_knowledge::LinkedInScraper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lkm_core::load_dotenv();

    // Load configuration (LKM_CONFIG_PATH overrides the default location)
    let config = lkm_core::Config::load()?;

    logging::init_tracing(&config.settings);

    info!(
        model = %config.settings.gemini.model,
        repository = %config.settings.storage.knowledge_repo_path.display(),
        "Configuration loaded"
    );

    let provider = Arc::new(GeminiClient::new(
        config.gemini_api_key(),
        &config.settings.gemini,
    )?);
    let scraper = Arc::new(LinkedInScraper::new(&config.settings.scraping)?);

    let bind_addr = config.bind_addr();
    let state = AppState::build(config.settings, scraper, provider).await?;

    server::run(state, &bind_addr).await
}
