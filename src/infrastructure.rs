//! Infrastructure layer
//!
//! Concrete implementations behind the domain interfaces: HTTP fetching,
//! HTML extraction, checkpoint persistence, export, configuration and logging.

pub mod checkpoint_store;
pub mod config;
pub mod export;
pub mod http_client;
pub mod logging;
pub mod parsing;

pub use checkpoint_store::{CheckpointError, CheckpointStore};
pub use config::{AppConfig, ConfigError, ConfigManager};
pub use export::{export_file_name, ExportError, ExportFormat, Exporter};
pub use http_client::{HttpClient, HttpClientConfig};
pub use logging::{init_logging, init_logging_with_config};
pub use parsing::CssPageExtractor;
