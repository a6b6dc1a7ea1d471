//! Logging system configuration and initialization
//!
//! - Console output (human readable)
//! - Optional daily-rolling log file via a non-blocking writer
//! - Optional JSON format for the file layer
//! - `RUST_LOG` overrides the configured level

#![allow(clippy::uninlined_format_args)]

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::Local;
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_NAME: &str = "catalog-crawler.log";

/// Dependencies whose logs are pinned to `warn` unless the level is `trace`
const NOISY_TARGETS: [&str; 6] = ["reqwest", "hyper", "hyper_util", "h2", "html5ever", "selectors"];

// Keeps the non-blocking file writer alive for the process lifetime
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Local time with millisecond precision
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// `logs/` next to the executable, falling back to the working directory
pub fn get_log_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        .join("logs")
}

/// Builds the level filter: `RUST_LOG` if set, else the configured level plus directives
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = Vec::new();
    if !config.level.to_lowercase().contains("trace") {
        directives.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")));
    }
    directives.extend(
        config
            .module_filters
            .iter()
            .map(|(module, level)| format!("{module}={level}")),
    );
    directives.push(format!("catalog_crawler_lib={}", config.level));
    directives.push(format!("catalog_crawler={}", config.level));

    directives
        .into_iter()
        .fold(EnvFilter::new(&config.level), |filter, directive| match directive.parse() {
            Ok(d) => filter.add_directive(d),
            Err(e) => {
                eprintln!("Ignoring invalid log directive '{}': {}", directive, e);
                filter
            }
        })
}

/// Initialize logging with the given configuration.
///
/// Fails if no output is enabled, or if a global subscriber is already installed.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }

    let console_layer = config.console_output.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(LocalTimeFormatter)
            .with_target(false)
    });

    let mut log_dir = None;
    let file_layer = if config.file_output {
        let dir = config.log_dir.clone().unwrap_or_else(get_log_directory);
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", dir, e))?;

        let (file_writer, file_guard) = non_blocking(rolling::daily(&dir, LOG_FILE_NAME));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard store poisoned"))?
            .push(file_guard);
        log_dir = Some(dir);

        let layer = fmt::Layer::new()
            .with_writer(file_writer)
            .with_timer(LocalTimeFormatter)
            .with_ansi(false);
        Some(if config.json_format {
            layer
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed()
        } else {
            layer.with_target(false).boxed()
        })
    } else {
        None
    };

    Registry::default()
        .with(build_env_filter(config))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    if let Some(dir) = log_dir {
        info!("Log directory: {:?} (json: {})", dir, config.json_format);
    }
    Ok(())
}

/// Initialize logging with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

pub fn log_system_info() {
    info!("=== catalog-crawler {} ===", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
}
