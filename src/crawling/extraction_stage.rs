//! # Extraction Stage
//!
//! HTML → 구조화 데이터 변환을 고정 크기 rayon 풀에서 병렬 실행한다.
//! 페이지는 청크 단위로 나뉘고, 청크마다 타임아웃이 적용된다.
//! 추출기 패닉은 페이지 단위로 격리되어 해당 페이지만 버린다.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::crawling::CrawlError;
use crate::domain::ports::PageExtractor;
use crate::domain::product::ProductRecord;
use crate::infrastructure::config::ExtractionConfig;

/// A successfully fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub records: Vec<ProductRecord>,
    /// Pages that panicked or yielded no product name
    pub dropped_pages: usize,
    pub timed_out_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLinks {
    pub page_url: String,
    pub links: Vec<String>,
}

/// Per-page results of one parallel map
struct MapOutcome<T> {
    items: Vec<Option<T>>,
    timed_out_chunks: usize,
}

pub struct ExtractionStage {
    extractor: Arc<dyn PageExtractor>,
    pool: Arc<ThreadPool>,
    workers: usize,
    chunk_timeout: Duration,
}

impl ExtractionStage {
    pub fn new(extractor: Arc<dyn PageExtractor>, config: &ExtractionConfig) -> Result<Self, CrawlError> {
        let workers = config.effective_workers();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("extract-{i}"))
            .build()
            .map_err(|e| CrawlError::ThreadPool(e.to_string()))?;

        debug!("🧵 Extraction pool ready ({} workers)", workers);
        Ok(Self {
            extractor,
            pool: Arc::new(pool),
            workers,
            chunk_timeout: config.chunk_timeout(),
        })
    }

    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Full product records from detail pages
    pub async fn extract(&self, pages: Vec<FetchedPage>) -> ExtractionOutcome {
        let total = pages.len();
        let scraped_at = Utc::now();
        let mapped = self
            .map_pages(pages, move |extractor, page| {
                let fields = extractor.extract_fields(&page.html, &page.url);
                ProductRecord::from_fields(&page.url, &fields, scraped_at)
            })
            .await;

        let records: Vec<ProductRecord> = mapped.items.into_iter().flatten().collect();
        let outcome = ExtractionOutcome {
            dropped_pages: total - records.len(),
            records,
            timed_out_chunks: mapped.timed_out_chunks,
        };
        debug!(
            "Extracted {} records from {} pages ({} dropped)",
            outcome.records.len(),
            total,
            outcome.dropped_pages
        );
        outcome
    }

    /// Product links per listing page; a failed page yields no links
    pub async fn extract_links(&self, pages: Vec<FetchedPage>) -> Vec<PageLinks> {
        let urls: Vec<String> = pages.iter().map(|p| p.url.clone()).collect();
        let mapped = self
            .map_pages(pages, |extractor, page| Some(extractor.extract_links(&page.html, &page.url)))
            .await;
        if mapped.timed_out_chunks > 0 {
            warn!("⏱️ {} link extraction chunks timed out", mapped.timed_out_chunks);
        }

        urls.into_iter()
            .zip(mapped.items)
            .map(|(page_url, links)| PageLinks {
                page_url,
                links: links.unwrap_or_default(),
            })
            .collect()
    }

    /// Records built from listing cards. Card URL is the source when present, else the listing URL.
    pub async fn extract_listing_records(&self, pages: Vec<FetchedPage>) -> ExtractionOutcome {
        let scraped_at = Utc::now();
        let mapped = self
            .map_pages(pages, move |extractor, page| {
                let records: Vec<ProductRecord> = extractor
                    .extract_listing_items(&page.html, &page.url)
                    .iter()
                    .filter_map(|fields| ProductRecord::from_fields(&page.url, fields, scraped_at))
                    .collect();
                Some(records)
            })
            .await;

        let dropped_pages = mapped.items.iter().filter(|items| items.is_none()).count();
        ExtractionOutcome {
            records: mapped.items.into_iter().flatten().flatten().collect(),
            dropped_pages,
            timed_out_chunks: mapped.timed_out_chunks,
        }
    }

    /// Parallel map over pages: `None` for a page that panicked or whose chunk timed out
    async fn map_pages<T, F>(&self, pages: Vec<FetchedPage>, work: F) -> MapOutcome<T>
    where
        T: Send + 'static,
        F: Fn(&dyn PageExtractor, &FetchedPage) -> Option<T> + Send + Sync + 'static,
    {
        let total = pages.len();
        if total == 0 {
            return MapOutcome {
                items: Vec::new(),
                timed_out_chunks: 0,
            };
        }

        let chunk_size = (total / self.workers).max(1);
        let work = Arc::new(work);
        let mut receivers = Vec::new();
        let mut chunk_lens = Vec::new();

        let mut pages = pages.into_iter().peekable();
        while pages.peek().is_some() {
            let chunk: Vec<FetchedPage> = pages.by_ref().take(chunk_size).collect();
            chunk_lens.push(chunk.len());

            let (tx, rx) = oneshot::channel::<Vec<Option<T>>>();
            let extractor = Arc::clone(&self.extractor);
            let work = Arc::clone(&work);
            self.pool.spawn(move || {
                let results = chunk
                    .iter()
                    .map(|page| {
                        catch_unwind(AssertUnwindSafe(|| (*work)(extractor.as_ref(), page))).unwrap_or_else(|_| {
                            warn!("💥 Extractor panicked on {}, page dropped", page.url);
                            None
                        })
                    })
                    .collect();
                // 수신 측이 타임아웃으로 사라졌으면 결과는 버린다
                let _ = tx.send(results);
            });
            receivers.push(rx);
        }

        let timeout = self.chunk_timeout;
        let joined = join_all(receivers.into_iter().map(|rx| tokio::time::timeout(timeout, rx))).await;

        let mut items = Vec::with_capacity(total);
        let mut timed_out_chunks = 0;
        for (result, len) in joined.into_iter().zip(chunk_lens) {
            match result {
                Ok(Ok(chunk)) => items.extend(chunk),
                Ok(Err(_)) | Err(_) => {
                    timed_out_chunks += 1;
                    items.extend(std::iter::repeat_with(|| None).take(len));
                }
            }
        }

        MapOutcome { items, timed_out_chunks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::FieldMap;
    use crate::test_utils::ScriptedExtractor;
    use std::thread;

    fn stage(workers: usize, chunk_timeout_ms: u64) -> ExtractionStage {
        let config = ExtractionConfig {
            workers,
            chunk_timeout_ms,
            ..ExtractionConfig::default()
        };
        ExtractionStage::new(Arc::new(ScriptedExtractor), &config).unwrap()
    }

    fn detail(i: usize) -> FetchedPage {
        FetchedPage::new(format!("https://shop.test/product/{i}"), format!("NAME: Item {i}"))
    }

    #[tokio::test]
    async fn test_panicking_page_is_isolated() {
        let mut pages: Vec<FetchedPage> = (1..=10).map(detail).collect();
        pages[4].html = "NAME: Broken\nPANIC".to_string();

        let outcome = stage(3, 5_000).extract(pages).await;

        assert_eq!(outcome.records.len(), 9);
        assert_eq!(outcome.dropped_pages, 1);
        assert_eq!(outcome.timed_out_chunks, 0);
        assert!(outcome.records.iter().all(|r| r.name != "Broken"));
    }

    #[tokio::test]
    async fn test_pages_without_name_are_dropped() {
        let pages = vec![detail(1), FetchedPage::new("https://shop.test/product/x", "PRICE: 10")];
        let outcome = stage(2, 5_000).extract(pages).await;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.dropped_pages, 1);
    }

    #[tokio::test]
    async fn test_links_keep_page_association() {
        let pages = vec![
            FetchedPage::new("https://shop.test/?page=1", "LINKS: https://shop.test/product/a"),
            FetchedPage::new("https://shop.test/?page=2", "nothing here"),
        ];
        let links = stage(2, 5_000).extract_links(pages).await;
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].links, vec!["https://shop.test/product/a"]);
        assert!(links[1].links.is_empty());
    }

    #[tokio::test]
    async fn test_listing_cards_become_records() {
        let pages = vec![FetchedPage::new(
            "https://shop.test/?page=3",
            "CARD: Kettle | https://shop.test/product/kettle\nCARD: Iron |",
        )];
        let outcome = stage(1, 5_000).extract_listing_records(pages).await;
        let urls: Vec<&str> = outcome.records.iter().map(|r| r.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://shop.test/product/kettle", "https://shop.test/?page=3"]);
    }

    struct SlowExtractor;

    impl PageExtractor for SlowExtractor {
        fn extract_fields(&self, html: &str, page_url: &str) -> FieldMap {
            if html.contains("SLOW") {
                thread::sleep(Duration::from_millis(400));
            }
            ScriptedExtractor.extract_fields(html, page_url)
        }

        fn extract_links(&self, _html: &str, _page_url: &str) -> Vec<String> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_slow_chunk_times_out() {
        let config = ExtractionConfig {
            workers: 2,
            chunk_timeout_ms: 100,
            ..ExtractionConfig::default()
        };
        let stage = ExtractionStage::new(Arc::new(SlowExtractor), &config).unwrap();
        let pages = vec![detail(1), FetchedPage::new("https://shop.test/product/slow", "NAME: Slow\nSLOW")];

        let outcome = stage.extract(pages).await;

        assert_eq!(outcome.timed_out_chunks, 1);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].name, "Item 1");
    }

    #[tokio::test]
    async fn test_empty_input() {
        let outcome = stage(2, 1_000).extract(Vec::new()).await;
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.timed_out_chunks, 0);
    }
}
