//! catalog-crawler - E-commerce catalog crawling library
//!
//! Fetches paginated catalog listings with adaptive concurrency, extracts
//! product records from HTML in parallel, de-duplicates them, checkpoints
//! long crawls for resumption and exports the result set.

// Module declarations
pub mod crawling;
pub mod domain;
pub mod infrastructure;
pub mod test_utils;

pub use crawling::{CrawlError, CrawlOrchestrator, CrawlOutcome, PipelineContext};
pub use domain::{CompletionStatus, CrawlCheckpoint, ListingUrlTemplate, ProductRecord, StopReason};
