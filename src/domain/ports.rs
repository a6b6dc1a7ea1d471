//! Collaborator interfaces used by the pipeline stages.
//!
//! 파이프라인은 구체 구현(reqwest, scraper)이 아닌 이 트레이트에만 의존한다.

use async_trait::async_trait;
use thiserror::Error;

use super::product::FieldMap;

/// Failure of a single page fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("HTTP error {0}")]
    Http(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,
}

/// Retrieves the HTML body of a page
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchFailure>;
}

/// Turns page HTML into product fields and links.
///
/// Implementations never fail: a page they cannot read yields an empty map.
/// They may still panic on pathological input; the extraction stage isolates that.
pub trait PageExtractor: Send + Sync {
    /// Product fields of a detail page
    fn extract_fields(&self, html: &str, page_url: &str) -> FieldMap;

    /// Product detail links found on a listing page
    fn extract_links(&self, html: &str, page_url: &str) -> Vec<String>;

    /// Product cards on a listing page, used when the page carries no detail links
    fn extract_listing_items(&self, _html: &str, _page_url: &str) -> Vec<FieldMap> {
        Vec::new()
    }
}
