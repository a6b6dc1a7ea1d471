//! Test utilities for the crawl pipeline
//!
//! Scripted collaborators that stand in for HTTP and HTML so pipeline tests
//! run without network access and with deterministic timing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::pagination::ListingUrlTemplate;
use crate::domain::ports::{FetchFailure, PageExtractor, PageFetcher};
use crate::domain::product::{FieldMap, FieldName, FieldValue, Price};
use crate::infrastructure::config::AppConfig;

#[derive(Clone)]
struct Scripted {
    response: Result<String, FetchFailure>,
    delay: Duration,
}

#[derive(Default)]
struct ProbeInner {
    requested: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Observes calls made to a [`ScriptedFetcher`] after it was moved into a stage
#[derive(Clone, Default)]
pub struct FetcherProbe {
    inner: Arc<ProbeInner>,
}

impl FetcherProbe {
    pub fn calls(&self) -> usize {
        self.requested().len()
    }

    /// URLs in request order
    pub fn requested(&self) -> Vec<String> {
        self.inner
            .requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

// Decrements the in-flight count even when the request task is aborted
struct InFlightGuard<'a>(&'a ProbeInner);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `PageFetcher` answering from a URL → response table.
///
/// Unknown URLs answer `Http(404)` unless a default page is set.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: HashMap<String, Scripted>,
    default_page: Option<Scripted>,
    cancel_on: HashMap<String, CancellationToken>,
    probe: FetcherProbe,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.delayed(url, body, Duration::ZERO)
    }

    pub fn delayed(mut self, url: impl Into<String>, body: impl Into<String>, delay: Duration) -> Self {
        self.responses.insert(
            url.into(),
            Scripted {
                response: Ok(body.into()),
                delay,
            },
        );
        self
    }

    pub fn failure(mut self, url: impl Into<String>, failure: FetchFailure) -> Self {
        self.responses.insert(
            url.into(),
            Scripted {
                response: Err(failure),
                delay: Duration::ZERO,
            },
        );
        self
    }

    pub fn default_page(mut self, body: impl Into<String>, delay: Duration) -> Self {
        self.default_page = Some(Scripted {
            response: Ok(body.into()),
            delay,
        });
        self
    }

    /// Fires `token` when `url` is requested, simulating a signal mid-fetch
    pub fn cancel_when_requested(mut self, url: impl Into<String>, token: CancellationToken) -> Self {
        self.cancel_on.insert(url.into(), token);
        self
    }

    pub fn probe(&self) -> FetcherProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchFailure> {
        let inner = &self.probe.inner;
        inner
            .requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(inner);

        if let Some(token) = self.cancel_on.get(url) {
            token.cancel();
        }

        let Some(scripted) = self.responses.get(url).or(self.default_page.as_ref()).cloned() else {
            return Err(FetchFailure::Http(404));
        };
        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        scripted.response
    }
}

/// `PageExtractor` reading line markers instead of HTML.
///
/// - `NAME: <name>` product name
/// - `PRICE: <amount>` price in KES
/// - `URL: <url>` explicit source URL
/// - `LINKS: <url>, <url>` product links of a listing page
/// - `CARD: <name> | <url>` listing card
/// - `PANIC` panics inside the extractor
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptedExtractor;

impl ScriptedExtractor {
    fn lines(html: &str) -> impl Iterator<Item = &str> {
        html.lines().map(str::trim).filter(|line| !line.is_empty())
    }

    fn check_panic(html: &str) {
        if Self::lines(html).any(|line| line == "PANIC") {
            panic!("scripted extractor failure");
        }
    }
}

impl PageExtractor for ScriptedExtractor {
    fn extract_fields(&self, html: &str, _page_url: &str) -> FieldMap {
        Self::check_panic(html);
        let mut fields = FieldMap::new();
        for line in Self::lines(html) {
            if let Some(name) = line.strip_prefix("NAME:") {
                fields.insert_text(FieldName::Name, name.trim());
            } else if let Some(url) = line.strip_prefix("URL:") {
                fields.insert_text(FieldName::SourceUrl, url.trim());
            } else if let Some(amount) = line.strip_prefix("PRICE:").and_then(|p| p.trim().parse::<f64>().ok()) {
                fields.insert(FieldName::Price, FieldValue::Money(Price::new(amount, "KES")));
            }
        }
        fields
    }

    fn extract_links(&self, html: &str, _page_url: &str) -> Vec<String> {
        Self::check_panic(html);
        Self::lines(html)
            .filter_map(|line| line.strip_prefix("LINKS:"))
            .flat_map(|links| links.split(','))
            .map(str::trim)
            .filter(|link| !link.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    fn extract_listing_items(&self, html: &str, _page_url: &str) -> Vec<FieldMap> {
        Self::check_panic(html);
        Self::lines(html)
            .filter_map(|line| line.strip_prefix("CARD:"))
            .map(|card| {
                let (name, url) = card.split_once('|').unwrap_or((card, ""));
                FieldMap::new()
                    .with_text(FieldName::Name, name.trim())
                    .with_text(FieldName::SourceUrl, url.trim())
            })
            .collect()
    }
}

/// Listing page body understood by [`ScriptedExtractor`]
pub fn listing_body(links: &[String]) -> String {
    format!("LINKS: {}", links.join(", "))
}

/// Detail page body understood by [`ScriptedExtractor`]
pub fn detail_body(name: &str) -> String {
    format!("NAME: {name}\nPRICE: 1500")
}

/// Scripted catalog: numbered listing pages linking to product detail pages
pub struct ScriptedCatalog {
    template: ListingUrlTemplate,
    fetcher: ScriptedFetcher,
}

impl ScriptedCatalog {
    /// # Panics
    /// On an invalid start URL
    pub fn new(start_url: &str) -> Self {
        Self {
            template: ListingUrlTemplate::parse(start_url).expect("valid start url"),
            fetcher: ScriptedFetcher::new(),
        }
    }

    pub fn template(&self) -> ListingUrlTemplate {
        self.template.clone()
    }

    pub fn listing_url(&self, page: u32) -> String {
        self.template.page_url(page)
    }

    pub fn product_url(page: u32, index: u32) -> String {
        format!("https://shop.test/product/p{page}-{index}")
    }

    /// Listing page `page` links `count` products, each with a detail page
    #[must_use]
    pub fn with_products(mut self, page: u32, count: u32) -> Self {
        let links: Vec<String> = (0..count).map(|i| Self::product_url(page, i)).collect();
        self.fetcher = self.fetcher.page(self.template.page_url(page), listing_body(&links));
        for (i, link) in links.iter().enumerate() {
            self.fetcher = self
                .fetcher
                .page(link.clone(), detail_body(&format!("Product {page}-{i}")));
        }
        self
    }

    /// Listing page without product links or cards
    #[must_use]
    pub fn with_empty_page(mut self, page: u32) -> Self {
        self.fetcher = self.fetcher.page(self.template.page_url(page), "<html></html>");
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, f: impl FnOnce(ScriptedFetcher) -> ScriptedFetcher) -> Self {
        self.fetcher = f(self.fetcher);
        self
    }

    pub fn probe(&self) -> FetcherProbe {
        self.fetcher.probe()
    }

    pub fn into_fetcher(self) -> ScriptedFetcher {
        self.fetcher
    }
}

/// Configuration with pacing removed and the checkpoint inside `dir`
pub fn fast_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.crawling.min_concurrency = 2;
    config.crawling.max_concurrency = 8;
    config.crawling.request_timeout_ms = 1_000;
    config.crawling.listing_pace_delay_ms = 0;
    config.crawling.detail_pace_delay_ms = 0;
    config.crawling.shutdown_grace_ms = 100;
    config.crawling.checkpoint_interval = 1_000;
    config.extraction.workers = 2;
    config.extraction.chunk_timeout_ms = 2_000;
    config.checkpoint.path = dir.join("checkpoint.json");
    config
}
