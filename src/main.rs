//! catalog-crawler command line entry point
//!
//! Exit codes: 0 = at least one record produced, 1 = no records or export
//! failure, 2 = invalid configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use catalog_crawler_lib::crawling::{CrawlOrchestrator, CrawlOutcome, PipelineContext};
use catalog_crawler_lib::domain::{CompletionStatus, ListingUrlTemplate};
use catalog_crawler_lib::infrastructure::logging::log_system_info;
use catalog_crawler_lib::infrastructure::{
    export_file_name, init_logging_with_config, AppConfig, CheckpointStore, ConfigManager, CssPageExtractor,
    ExportFormat, HttpClient, HttpClientConfig,
};

const EXIT_NO_RECORDS: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "catalog-crawler")]
#[command(about = "Adaptive concurrent crawler for paginated e-commerce catalogs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl a catalog starting from its first listing page
    Crawl {
        /// First listing page; may contain a `{page}` placeholder
        url: String,

        #[arg(short, long, help = "Configuration file (JSON)")]
        config: Option<PathBuf>,

        #[arg(long, help = "Last listing page to visit")]
        max_pages: Option<u32>,

        #[arg(long, help = "Stop once this many unique records were collected")]
        target: Option<usize>,

        #[arg(long, help = "Time budget for this run in seconds")]
        time_budget: Option<u64>,

        #[arg(short, long, value_enum, help = "Export format")]
        format: Option<ExportFormat>,

        #[arg(short, long, help = "Export directory")]
        output: Option<PathBuf>,

        #[arg(long, help = "Discard any saved checkpoint and start from page 1")]
        fresh: bool,
    },

    /// Print the saved checkpoint, if any
    ShowCheckpoint {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Delete the saved checkpoint
    ClearCheckpoint {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ {:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_NO_RECORDS)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Crawl {
            url,
            config,
            max_pages,
            target,
            time_budget,
            format,
            output,
            fresh,
        } => {
            let Some(mut app_config) = load_config(config.as_deref()).await else {
                return Ok(ExitCode::from(EXIT_CONFIG));
            };
            let crawling = &mut app_config.crawling;
            crawling.max_pages = max_pages.or(crawling.max_pages);
            crawling.target_record_count = target.or(crawling.target_record_count);
            crawling.time_budget_seconds = time_budget.or(crawling.time_budget_seconds);
            if let Some(format) = format {
                app_config.export.format = format;
            }
            if let Some(output) = output {
                app_config.export.output_dir = output;
            }
            if let Err(e) = app_config.validate() {
                eprintln!("Error: {e}");
                return Ok(ExitCode::from(EXIT_CONFIG));
            }

            crawl(app_config, &url, fresh).await
        }
        Commands::ShowCheckpoint { config } => {
            let Some(app_config) = load_config(config.as_deref()).await else {
                return Ok(ExitCode::from(EXIT_CONFIG));
            };
            let store = CheckpointStore::new(app_config.checkpoint.path);
            match store.load().await {
                Some(checkpoint) => {
                    println!("Checkpoint: {}", store.path().display());
                    println!("  Catalog:        {}", checkpoint.start_url.as_deref().unwrap_or("(unknown)"));
                    println!("  Last page:      {}", checkpoint.last_page_index);
                    println!("  Records:        {}", checkpoint.accumulated_record_count);
                    println!("  Elapsed:        {:.1}s", checkpoint.elapsed_so_far_secs);
                    println!("  Saved at:       {}", checkpoint.timestamp.with_timezone(&Local));
                }
                None => println!("No checkpoint at {}", store.path().display()),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::ClearCheckpoint { config } => {
            let Some(app_config) = load_config(config.as_deref()).await else {
                return Ok(ExitCode::from(EXIT_CONFIG));
            };
            let store = CheckpointStore::new(app_config.checkpoint.path);
            store.clear().await?;
            println!("Checkpoint cleared: {}", store.path().display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `None` after reporting an invalid configuration
async fn load_config(path: Option<&Path>) -> Option<AppConfig> {
    let manager = path.map_or_else(
        || ConfigManager::new(ConfigManager::default_config_path()),
        ConfigManager::new,
    );
    match manager.load_config().await {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Configuration error ({}): {e}", manager.config_path().display());
            None
        }
    }
}

async fn crawl(config: AppConfig, url: &str, fresh: bool) -> Result<ExitCode> {
    init_logging_with_config(&config.logging)?;
    log_system_info();

    let template = match ListingUrlTemplate::parse(url) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Invalid start URL '{url}': {e}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    let checkpoint_store = CheckpointStore::new(config.checkpoint.path.clone());
    if fresh {
        checkpoint_store.clear().await?;
        info!("🧹 Starting fresh, previous checkpoint removed");
    }

    let fetcher = HttpClient::new(HttpClientConfig::from_app_config(&config))?;
    let extractor = CssPageExtractor::from_config(&config.extraction).context("Invalid selector configuration")?;

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let export = config.export.clone();
    let context = PipelineContext::builder()
        .config(config)
        .fetcher(Arc::new(fetcher))
        .extractor(Arc::new(extractor))
        .checkpoint_store(checkpoint_store)
        .cancellation_token(cancel)
        .build()?;
    let orchestrator = CrawlOrchestrator::new(context, template)?;

    let outcome = orchestrator.run().await;
    print_summary(&outcome);

    if outcome.records.is_empty() {
        eprintln!("No records were produced.");
        return Ok(ExitCode::from(EXIT_NO_RECORDS));
    }

    let file_name = export_file_name(
        &export.file_prefix,
        outcome.status == CompletionStatus::Completed,
        export.format,
        Local::now(),
    );
    let destination = export.output_dir.join(file_name);
    match export.format.exporter().export(&outcome.records, &destination) {
        Ok(path) => println!("Exported {} records to {}", outcome.record_count(), path.display()),
        Err(e) => {
            error!("❌ Export failed: {}", e);
            eprintln!("Export failed: {e}");
            return Ok(ExitCode::from(EXIT_NO_RECORDS));
        }
    }

    if outcome.status != CompletionStatus::Completed {
        println!(
            "Note: partial result ({:?}). Run the same command again to resume from page {}.",
            outcome.status,
            outcome.last_page_index + 1
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Cancels the crawl on SIGINT, and on SIGTERM where available
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("⚠️ SIGTERM handler unavailable: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        warn!("🛑 Shutdown signal received, finishing in-flight requests...");
        cancel.cancel();
    });
}

fn print_summary(outcome: &CrawlOutcome) {
    println!();
    println!("=== Crawl summary ===");
    println!("  Status:         {:?} ({})", outcome.status, outcome.stop_reason);
    println!("  Records:        {}", outcome.record_count());
    println!("  Pages:          {} this run, last page {}", outcome.pages_processed, outcome.last_page_index);
    if let Some(page) = outcome.resumed_from {
        println!("  Resumed from:   page {page}");
    }
    println!("  Elapsed:        {:.1}s", outcome.elapsed.as_secs_f64());
    if let Some(e) = &outcome.checkpoint_error {
        println!("  Checkpoint:     failed ({e})");
    }
}
