//! Command-line front end: process URLs, search the repository, check the
//! setup, and take backups.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use lkm_core::{Category, Config, Settings};
use lkm_db::CacheDbPool;
use lkm_gateway::batch::{ProgressCallback, ProgressUpdate};
use lkm_gateway::logging::RedactingFields;
use lkm_gateway::providers::{GeminiClient, HealthStatus, Provider};
use lkm_gateway::state::AppState;
use lkm_knowledge::{BackupKind, FileOrganizer, LinkedInScraper, RepositoryManager};
use tracing::{info, warn};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "lkm")]
#[command(author, version, about = "Turn LinkedIn posts into a searchable knowledge base", long_about = None)]
struct Cli {
    /// Settings file (defaults to ~/.config/lkm/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Process a single LinkedIn post URL
    #[arg(long)]
    url: Option<String>,

    /// Process every URL in a file, one per line; `#` starts a comment
    #[arg(long, value_name = "PATH")]
    urls_file: Option<PathBuf>,

    /// Search the knowledge repository
    #[arg(long)]
    search: Option<String>,

    /// Restrict search or listing to a category
    #[arg(long)]
    category: Option<String>,

    /// Parallel URLs when processing a file
    #[arg(long, default_value_t = 3)]
    max_concurrent: usize,

    /// Validate configuration, storage and the Gemini connection
    #[arg(long)]
    check: bool,

    /// With --check, skip the Gemini health check
    #[arg(long)]
    offline: bool,

    /// Take a full backup of the repository
    #[arg(long)]
    backup: bool,

    /// Print the environment variables and sample config a CI job needs
    #[arg(long)]
    setup_ci: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    lkm_core::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| if cli.verbose { "info" } else { "warn" }.into()),
        )
        .fmt_fields(RedactingFields::default())
        .with_writer(std::io::stderr)
        .init();

    if cli.setup_ci {
        print_ci_setup();
        return Ok(());
    }
    if cli.check {
        return run_check(&cli).await;
    }
    if cli.backup {
        return run_backup(&load_settings(&cli)?).await;
    }
    if let Some(query) = &cli.search {
        return run_search(&load_settings(&cli)?, query, cli.category.as_deref()).await;
    }
    if cli.url.is_some() || cli.urls_file.is_some() {
        return run_processing(&cli).await;
    }
    if let Some(category) = &cli.category {
        return run_list(&load_settings(&cli)?, category).await;
    }

    Cli::command().print_help()?;
    println!();
    Ok(())
}

fn load_settings(cli: &Cli) -> CliResult<Settings> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)?,
        None => Settings::load()?,
    };
    settings.validate()?;
    Ok(settings)
}

fn load_config(cli: &Cli) -> CliResult<Config> {
    Ok(match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    })
}

async fn run_processing(cli: &Cli) -> CliResult<()> {
    let config = load_config(cli)?;
    let provider = Arc::new(GeminiClient::new(
        config.gemini_api_key(),
        &config.settings.gemini,
    )?);
    let scraper = Arc::new(LinkedInScraper::new(&config.settings.scraping)?);
    let state = AppState::build(config.settings, scraper, provider).await?;

    if let Some(url) = &cli.url {
        match state.pipeline.process_url(url).await {
            Ok(outcome) => println!("✓ {url} -> {}", outcome.item_id()),
            Err(e) => println!("✗ {url}: {e}"),
        }
    }

    if let Some(path) = &cli.urls_file {
        let content = tokio::fs::read_to_string(path).await?;
        let urls = parse_urls_file(&content);
        println!("Queued {} URLs from {}", urls.len(), path.display());

        let task_ids = state
            .batch
            .add_urls(&urls, lkm_gateway::TaskPriority::Normal)
            .await;
        info!(queued = task_ids.len(), "URLs queued");

        let progress: ProgressCallback = Arc::new(|update: ProgressUpdate| {
            eprintln!(
                "  {}/{} done, {} failed, {} active, {} waiting",
                update.completed_tasks,
                update.total_tasks,
                update.failed_tasks,
                update.active_tasks,
                update.queue_size
            );
        });
        state
            .batch
            .process_queue(cli.max_concurrent, Some(progress))
            .await?;
    }

    let stats = state.pipeline.stats();
    let duplicates = state.batch.stats().stats.duplicates_skipped;
    println!();
    println!("Processing summary");
    println!("  Processed:  {}", stats.total_processed);
    println!("  Successful: {}", stats.successful);
    println!("  Failed:     {}", stats.failed);
    println!("  Skipped:    {}", stats.skipped + duplicates);

    state.shutdown().await;
    Ok(())
}

async fn run_search(settings: &Settings, query: &str, category: Option<&str>) -> CliResult<()> {
    let manager = RepositoryManager::open(&settings.storage.knowledge_repo_path).await?;
    let category = category.map(parse_category).transpose()?;
    let results = manager.search_database(query, category, 20).await?;

    if results.is_empty() {
        println!("No results for '{query}'");
    }
    for (rank, item) in results.iter().enumerate() {
        println!("{}. [{}] {}", rank + 1, item.category, item.topic);
        println!("   {}", preview(&item.key_knowledge_content, 160));
        println!("   {}", item.source_link);
    }

    manager.close().await;
    Ok(())
}

async fn run_list(settings: &Settings, category: &str) -> CliResult<()> {
    let category = parse_category(category)?;
    let manager = RepositoryManager::open(&settings.storage.knowledge_repo_path).await?;
    let repository = manager.load_repository().await?;
    let items = repository.get_items_by_category(category);

    println!("{} items in {category}", items.len());
    for item in items {
        println!("- {} ({})", item.topic, item.source_link);
    }
    manager.close().await;
    Ok(())
}

async fn run_backup(settings: &Settings) -> CliResult<()> {
    let root = &settings.storage.knowledge_repo_path;
    let manager = RepositoryManager::open(root).await?;
    let repository = manager.load_repository().await?;
    let organizer = FileOrganizer::new(root)?;

    let path = organizer.create_backup(&repository, BackupKind::Full)?;
    println!(
        "✓ Backup of {} items written to {}",
        repository.items.len(),
        path.display()
    );
    manager.close().await;
    Ok(())
}

async fn run_check(cli: &Cli) -> CliResult<()> {
    let mut failures = 0;

    let settings = match load_settings(cli) {
        Ok(settings) => {
            println!("✓ Settings valid");
            settings
        }
        Err(e) => {
            println!("✗ Settings: {e}");
            return Err("configuration check failed".into());
        }
    };

    match CacheDbPool::from_settings(&settings).await {
        Ok(cache) => {
            println!("✓ Cache database at {}", settings.storage.cache_db_path.display());
            cache.close().await;
        }
        Err(e) => {
            println!("✗ Cache database: {e}");
            failures += 1;
        }
    }

    let root = &settings.storage.knowledge_repo_path;
    match RepositoryManager::open(root).await {
        Ok(manager) => {
            match manager.get_statistics().await {
                Ok(stats) => println!("✓ Repository at {} ({} items)", root.display(), stats.total_items),
                Err(e) => {
                    println!("✗ Repository statistics: {e}");
                    failures += 1;
                }
            }
            manager.close().await;
        }
        Err(e) => {
            println!("✗ Repository: {e}");
            failures += 1;
        }
    }

    match FileOrganizer::new(root) {
        Ok(organizer) => {
            let validation = organizer.validate_structure();
            if validation.valid {
                println!("✓ Folder structure");
            } else {
                println!("✗ Folder structure: {}", validation.issues.join("; "));
                failures += 1;
            }
        }
        Err(e) => {
            println!("✗ Folder structure: {e}");
            failures += 1;
        }
    }

    if cli.offline {
        println!("- Gemini check skipped (--offline)");
    } else {
        failures += check_gemini(&settings).await;
    }

    if failures > 0 {
        return Err(format!("{failures} check(s) failed").into());
    }
    println!("All checks passed");
    Ok(())
}

async fn check_gemini(settings: &Settings) -> usize {
    let secrets = lkm_core::Secrets::from_env();
    let key = match secrets.require_gemini_key() {
        Ok(key) => key,
        Err(e) => {
            println!("✗ Gemini: {e}");
            return 1;
        }
    };
    let client = match GeminiClient::new(key, &settings.gemini) {
        Ok(client) => client,
        Err(e) => {
            println!("✗ Gemini client: {e}");
            return 1;
        }
    };

    let health = client.health_check().await;
    match health.status {
        HealthStatus::Healthy => {
            println!("✓ Gemini ({})", health.model);
            0
        }
        HealthStatus::Degraded => {
            warn!(model = %health.model, "Gemini answered unexpectedly");
            println!("! Gemini reachable but answered unexpectedly");
            0
        }
        HealthStatus::Unhealthy => {
            println!(
                "✗ Gemini: {}",
                health.error.as_deref().unwrap_or("connection failed")
            );
            1
        }
    }
}

fn print_ci_setup() {
    println!("Required environment variables:");
    println!("  GEMINI_API_KEY   Google Gemini API key");
    println!();
    println!("Optional environment variables:");
    println!("  API_SECRET_KEY   shared secret for the HTTP API");
    println!("  LKM_CONFIG_PATH  settings file location");
    println!("  RUST_LOG         log filter, e.g. info or lkm_gateway=debug");
    println!();
    println!("Sample settings file:");
    println!();
    print!("{}", Settings::default_toml());
}

/// Non-empty lines that are not comments.
fn parse_urls_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn parse_category(value: &str) -> CliResult<Category> {
    Category::ALL
        .into_iter()
        .find(|category| category.as_str().eq_ignore_ascii_case(value.trim()))
        .ok_or_else(|| {
            let names: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
            format!("unknown category '{value}', expected one of: {}", names.join(", ")).into()
        })
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
