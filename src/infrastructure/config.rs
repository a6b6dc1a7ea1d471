//! Configuration infrastructure
//!
//! Contains configuration loading and management for catalog crawling.
//!
//! Sources are layered in this order (later wins):
//! 1. Built-in defaults (`defaults` module)
//! 2. JSON configuration file
//! 3. Environment variables prefixed with `CATALOG_CRAWLER__` (e.g. `CATALOG_CRAWLER__CRAWLING__MAX_CONCURRENCY=30`)

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::infrastructure::export::ExportFormat;
use crate::infrastructure::parsing::PriceSelectionPolicy;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CATALOG_CRAWLER";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Config file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Pipeline limits and stop conditions
    pub crawling: CrawlingConfig,

    /// Adaptive concurrency constants
    pub rate_control: RateControlConfig,

    /// HTTP client settings
    pub http: HttpConfig,

    /// Extraction worker pool and price policy
    pub extraction: ExtractionConfig,

    /// Checkpoint file location
    pub checkpoint: CheckpointConfig,

    /// Result export settings
    pub export: ExportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Crawl loop limits and stop conditions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlingConfig {
    /// Lower bound of the adaptive concurrency level
    pub min_concurrency: usize,

    /// Upper bound of the adaptive concurrency level
    pub max_concurrency: usize,

    /// Overall timeout of a single request
    pub request_timeout_ms: u64,

    /// Delay between listing page dispatches
    pub listing_pace_delay_ms: u64,

    /// Delay between detail page dispatches (shorter than listing)
    pub detail_pace_delay_ms: u64,

    /// Stop after this many consecutive pages with no new records
    pub max_consecutive_empty_pages: u32,

    /// Stop (degraded) after this many consecutive listing fetch failures
    pub max_consecutive_failures: u32,

    /// Wall-clock budget of a single run
    pub time_budget_seconds: Option<u64>,

    /// Stop once this many unique records are held
    pub target_record_count: Option<usize>,

    /// Write a checkpoint every N newly accepted records
    pub checkpoint_interval: usize,

    /// Highest listing page index to crawl
    pub max_pages: Option<u32>,

    /// Re-submissions of a failed listing page before moving on
    pub listing_retry_limit: u32,

    /// Grace period for in-flight requests after an interrupt
    pub shutdown_grace_ms: u64,

    /// Cap on product links taken from one listing page
    pub max_product_links_per_page: usize,
}

impl Default for CrawlingConfig {
    fn default() -> Self {
        Self {
            min_concurrency: defaults::MIN_CONCURRENCY,
            max_concurrency: defaults::MAX_CONCURRENCY,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            listing_pace_delay_ms: defaults::LISTING_PACE_DELAY_MS,
            detail_pace_delay_ms: defaults::DETAIL_PACE_DELAY_MS,
            max_consecutive_empty_pages: defaults::MAX_CONSECUTIVE_EMPTY_PAGES,
            max_consecutive_failures: defaults::MAX_CONSECUTIVE_FAILURES,
            time_budget_seconds: None,
            target_record_count: None,
            checkpoint_interval: defaults::CHECKPOINT_INTERVAL,
            max_pages: None,
            listing_retry_limit: defaults::LISTING_RETRY_LIMIT,
            shutdown_grace_ms: defaults::SHUTDOWN_GRACE_MS,
            max_product_links_per_page: defaults::MAX_PRODUCT_LINKS_PER_PAGE,
        }
    }
}

impl CrawlingConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn listing_pace_delay(&self) -> Duration {
        Duration::from_millis(self.listing_pace_delay_ms)
    }

    pub const fn detail_pace_delay(&self) -> Duration {
        Duration::from_millis(self.detail_pace_delay_ms)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_seconds.map(Duration::from_secs)
    }
}

/// Constants of the adaptive concurrency rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateControlConfig {
    /// Capacity of the latency FIFO
    pub window_size: usize,

    /// Samples required before the level may grow
    pub warmup_samples: usize,

    /// Error count above which the level is cut
    pub error_threshold: u32,

    /// Mean latency under which the level may grow
    pub fast_threshold_ms: u64,

    /// Mean latency above which the level shrinks
    pub slow_threshold_ms: u64,

    pub increase_step: usize,
    pub error_decrease_step: usize,
    pub slow_decrease_step: usize,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            window_size: defaults::LATENCY_WINDOW_SIZE,
            warmup_samples: defaults::WARMUP_SAMPLES,
            error_threshold: defaults::ERROR_THRESHOLD,
            fast_threshold_ms: defaults::FAST_THRESHOLD_MS,
            slow_threshold_ms: defaults::SLOW_THRESHOLD_MS,
            increase_step: defaults::INCREASE_STEP,
            error_decrease_step: defaults::ERROR_DECREASE_STEP,
            slow_decrease_step: defaults::SLOW_DECREASE_STEP,
        }
    }
}

/// HTTP client configuration for crawling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,

    /// Global request ceiling enforced by a token bucket (0 disables it)
    pub max_requests_per_second: u32,

    pub follow_redirects: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            max_requests_per_second: 0,
            follow_redirects: true,
        }
    }
}

/// Extraction worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Worker threads (0 = number of CPUs)
    pub workers: usize,

    /// Timeout for one chunk of pages
    pub chunk_timeout_ms: u64,

    /// How one price is chosen among several candidates
    pub price_policy: PriceSelectionPolicy,

    /// Candidates at or below this amount are ignored
    pub min_plausible_price: f64,

    /// Currency assumed for bare numbers
    pub default_currency: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            chunk_timeout_ms: defaults::CHUNK_TIMEOUT_MS,
            price_policy: PriceSelectionPolicy::default(),
            min_plausible_price: defaults::MIN_PLAUSIBLE_PRICE,
            default_currency: defaults::DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl ExtractionConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        }
    }

    pub const fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::CHECKPOINT_FILE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub format: ExportFormat,
    pub file_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            format: ExportFormat::Csv,
            file_prefix: defaults::EXPORT_FILE_PREFIX.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs in the log file
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Log directory (defaults to `logs/` next to the executable)
    pub log_dir: Option<PathBuf>,

    /// Module-specific log level filters (e.g., "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            module_filters: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the optional file, then environment overrides, and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let crawling = &self.crawling;
        if crawling.min_concurrency == 0 {
            return Err(ConfigError::validation("min_concurrency must be at least 1"));
        }
        if crawling.min_concurrency > crawling.max_concurrency {
            return Err(ConfigError::validation(format!(
                "min_concurrency ({}) exceeds max_concurrency ({})",
                crawling.min_concurrency, crawling.max_concurrency
            )));
        }
        if crawling.request_timeout_ms == 0 {
            return Err(ConfigError::validation("request_timeout_ms must be positive"));
        }
        if crawling.checkpoint_interval == 0 {
            return Err(ConfigError::validation("checkpoint_interval must be positive"));
        }
        if crawling.max_consecutive_empty_pages == 0 || crawling.max_consecutive_failures == 0 {
            return Err(ConfigError::validation(
                "max_consecutive_empty_pages and max_consecutive_failures must be positive",
            ));
        }
        if crawling.max_pages == Some(0) {
            return Err(ConfigError::validation("max_pages must be positive when set"));
        }

        let rate = &self.rate_control;
        if rate.window_size == 0 || rate.warmup_samples == 0 || rate.warmup_samples > rate.window_size {
            return Err(ConfigError::validation(format!(
                "warmup_samples ({}) must be within 1..=window_size ({})",
                rate.warmup_samples, rate.window_size
            )));
        }
        if rate.fast_threshold_ms >= rate.slow_threshold_ms {
            return Err(ConfigError::validation(
                "fast_threshold_ms must be lower than slow_threshold_ms",
            ));
        }

        if self.extraction.chunk_timeout_ms == 0 {
            return Err(ConfigError::validation("chunk_timeout_ms must be positive"));
        }

        Ok(())
    }
}

/// Configuration file manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Default location: `<user config dir>/catalog-crawler/catalog_crawler_config.json`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("catalog-crawler")
            .join("catalog_crawler_config.json")
    }

    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Writes the default configuration on first run, then loads it.
    ///
    /// An unreadable file is backed up to `*.json.corrupted` and defaults
    /// (plus environment overrides) are used instead.
    pub async fn load_config(&self) -> Result<AppConfig, ConfigError> {
        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            info!("🎉 Configuration file not found, creating default: {:?}", self.config_path);
            self.save_config(&AppConfig::default()).await?;
        }

        match AppConfig::load(Some(&self.config_path)) {
            Ok(config) => {
                info!("Loaded configuration from: {:?}", self.config_path);
                Ok(config)
            }
            Err(ConfigError::FileLoad { source }) => {
                warn!("⚠️  Configuration file unreadable: {}", source);
                warn!("⚠️  Resetting to default configuration");

                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    warn!("Failed to create backup of corrupted config: {}", e);
                } else {
                    info!("Backed up corrupted config to: {:?}", backup_path);
                }

                self.save_config(&AppConfig::default()).await?;
                AppConfig::load(None)
            }
            Err(other) => Err(other),
        }
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(dir) = self.config_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).await?;
            }
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await?;
        info!("✅ Configuration saved to: {:?}", self.config_path);
        Ok(())
    }
}

/// Default values
pub mod defaults {
    pub const MIN_CONCURRENCY: usize = 10;
    pub const MAX_CONCURRENCY: usize = 60;
    pub const REQUEST_TIMEOUT_MS: u64 = 6_000;
    pub const LISTING_PACE_DELAY_MS: u64 = 500;
    pub const DETAIL_PACE_DELAY_MS: u64 = 100;
    pub const MAX_CONSECUTIVE_EMPTY_PAGES: u32 = 3;
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;
    pub const CHECKPOINT_INTERVAL: usize = 50;
    pub const LISTING_RETRY_LIMIT: u32 = 1;
    pub const SHUTDOWN_GRACE_MS: u64 = 2_000;
    pub const MAX_PRODUCT_LINKS_PER_PAGE: usize = 300;

    // Adaptive concurrency
    pub const LATENCY_WINDOW_SIZE: usize = 50;
    pub const WARMUP_SAMPLES: usize = 10;
    pub const ERROR_THRESHOLD: u32 = 5;
    pub const FAST_THRESHOLD_MS: u64 = 500;
    pub const SLOW_THRESHOLD_MS: u64 = 2_000;
    pub const INCREASE_STEP: usize = 2;
    pub const ERROR_DECREASE_STEP: usize = 3;
    pub const SLOW_DECREASE_STEP: usize = 1;

    // Extraction
    pub const CHUNK_TIMEOUT_MS: u64 = 15_000;
    pub const MIN_PLAUSIBLE_PRICE: f64 = 100.0;
    pub const DEFAULT_CURRENCY: &str = "KES";

    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    pub const CHECKPOINT_FILE: &str = "crawl_checkpoint.json";
    pub const OUTPUT_DIR: &str = "output";
    pub const EXPORT_FILE_PREFIX: &str = "scraped_products";
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.crawling.min_concurrency, 10);
        assert_eq!(config.crawling.max_concurrency, 60);
        assert_eq!(config.crawling.request_timeout(), Duration::from_secs(6));
        assert!(config.crawling.detail_pace_delay() < config.crawling.listing_pace_delay());
    }

    #[test]
    fn test_validation_rejects_inverted_bounds() {
        let mut config = AppConfig::default();
        config.crawling.min_concurrency = 20;
        config.crawling.max_concurrency = 5;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        let mut config = AppConfig::default();
        config.crawling.min_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_control.warmup_samples = 80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crawler.json");
        std::fs::write(
            &path,
            r#"{ "crawling": { "max_concurrency": 30, "time_budget_seconds": 120 },
                 "extraction": { "price_policy": "first_valid" } }"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.crawling.max_concurrency, 30);
        assert_eq!(config.crawling.min_concurrency, 10);
        assert_eq!(config.crawling.time_budget(), Some(Duration::from_secs(120)));
        assert_eq!(config.extraction.price_policy, PriceSelectionPolicy::FirstValid);
    }

    #[tokio::test]
    async fn test_manager_writes_default_on_first_run() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().join("nested").join("config.json"));

        let config = manager.load_config().await.unwrap();
        assert!(manager.config_path().exists());
        assert_eq!(config.crawling.checkpoint_interval, defaults::CHECKPOINT_INTERVAL);
    }

    #[tokio::test]
    async fn test_manager_recovers_from_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let manager = ConfigManager::new(&path);
        let config = manager.load_config().await.unwrap();
        assert_eq!(config.crawling.max_consecutive_empty_pages, 3);
        assert!(path.with_extension("json.corrupted").exists());
    }
}
