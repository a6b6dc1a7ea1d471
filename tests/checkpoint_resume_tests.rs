//! Checkpoint write on interrupt and resumption from it

use std::sync::Arc;

use catalog_crawler_lib::crawling::{CrawlOrchestrator, PipelineContext};
use catalog_crawler_lib::domain::{CompletionStatus, CrawlCheckpoint, DedupKey, StopReason};
use catalog_crawler_lib::infrastructure::CheckpointStore;
use catalog_crawler_lib::infrastructure::config::AppConfig;
use catalog_crawler_lib::test_utils::{detail_body, fast_config, listing_body, ScriptedCatalog, ScriptedExtractor};
use chrono::Utc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const START: &str = "https://shop.test/shop/";

fn orchestrator(config: AppConfig, catalog: ScriptedCatalog, cancel: CancellationToken) -> CrawlOrchestrator {
    let template = catalog.template();
    let context = PipelineContext::builder()
        .config(config)
        .fetcher(Arc::new(catalog.into_fetcher()))
        .extractor(Arc::new(ScriptedExtractor))
        .cancellation_token(cancel)
        .build()
        .unwrap();
    CrawlOrchestrator::new(context, template).unwrap()
}

fn five_page_catalog() -> ScriptedCatalog {
    (1..=5).fold(ScriptedCatalog::new(START), |c, page| c.with_products(page, 2))
}

#[tokio::test]
async fn interrupt_writes_checkpoint_and_next_run_resumes() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.crawling.max_pages = Some(4);
    let store = CheckpointStore::new(config.checkpoint.path.clone());

    // first run: a signal arrives while page 3's listing is being fetched
    let cancel = CancellationToken::new();
    let catalog = five_page_catalog();
    let page3 = catalog.listing_url(3);
    let catalog = catalog.with_fetcher(|f| f.cancel_when_requested(page3.clone(), cancel.clone()));

    let interrupted = orchestrator(config.clone(), catalog, cancel).run().await;

    assert_eq!(interrupted.stop_reason, StopReason::Interrupted);
    assert_eq!(interrupted.status, CompletionStatus::Interrupted);
    assert_eq!(interrupted.record_count(), 4);
    assert!(interrupted.checkpoint_error.is_none());

    let checkpoint = store.load().await.expect("checkpoint written on interrupt");
    assert_eq!(checkpoint.last_page_index, 2);
    assert_eq!(checkpoint.accumulated_record_count, 4);
    assert_eq!(checkpoint.seen_keys.len(), 4);
    assert_eq!(checkpoint.records.len(), 4);

    // second run: starts at last_page_index + 1
    let catalog = five_page_catalog();
    let requests = catalog.probe();

    let resumed = orchestrator(config, catalog, CancellationToken::new()).run().await;

    assert_eq!(requests.requested().first(), Some(&page3));
    assert_eq!(resumed.resumed_from, Some(3));
    assert_eq!(resumed.stop_reason, StopReason::PageCeilingReached);
    assert_eq!(resumed.record_count(), 8);
    assert_eq!(resumed.pages_processed, 2);
    assert!(resumed.elapsed.as_secs_f64() >= checkpoint.elapsed_so_far_secs);
    assert!(store.load().await.is_none());
}

#[tokio::test]
async fn resumed_crawl_skips_already_seen_products() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.crawling.max_pages = Some(2);
    let store = CheckpointStore::new(config.checkpoint.path.clone());

    let seen = ScriptedCatalog::product_url(2, 0);
    store
        .save(&CrawlCheckpoint {
            last_page_index: 1,
            seen_keys: vec![DedupKey::for_url(&seen)],
            accumulated_record_count: 1,
            timestamp: Utc::now(),
            elapsed_so_far_secs: 12.0,
            start_url: Some(START.to_string()),
            records: Vec::new(),
        })
        .await
        .unwrap();

    let catalog = ScriptedCatalog::new(START).with_products(2, 3);
    let requests = catalog.probe();

    let outcome = orchestrator(config, catalog, CancellationToken::new()).run().await;

    assert_eq!(outcome.record_count(), 2);
    assert!(!requests.requested().contains(&seen));
}

#[tokio::test]
async fn corrupt_checkpoint_starts_fresh() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.crawling.max_pages = Some(1);
    std::fs::write(&config.checkpoint.path, "{ not json").unwrap();

    let catalog = five_page_catalog();
    let page1 = catalog.listing_url(1);
    let requests = catalog.probe();

    let outcome = orchestrator(config, catalog, CancellationToken::new()).run().await;

    assert_eq!(requests.requested().first(), Some(&page1));
    assert_eq!(outcome.resumed_from, None);
    assert_eq!(outcome.record_count(), 2);
}

#[tokio::test]
async fn checkpoint_of_another_catalog_is_ignored() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.crawling.max_pages = Some(1);
    let store = CheckpointStore::new(config.checkpoint.path.clone());
    store
        .save(&CrawlCheckpoint {
            last_page_index: 7,
            seen_keys: Vec::new(),
            accumulated_record_count: 0,
            timestamp: Utc::now(),
            elapsed_so_far_secs: 0.0,
            start_url: Some("https://other.test/catalog/".to_string()),
            records: Vec::new(),
        })
        .await
        .unwrap();

    let outcome = orchestrator(config, five_page_catalog(), CancellationToken::new()).run().await;

    assert_eq!(outcome.resumed_from, None);
    assert_eq!(outcome.last_page_index, 1);
    assert_eq!(outcome.status, CompletionStatus::Completed);
}

#[tokio::test]
async fn periodic_checkpoint_tracks_progress() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.crawling.checkpoint_interval = 2;
    config.crawling.max_pages = Some(3);
    let store = CheckpointStore::new(config.checkpoint.path.clone());

    // page 3 is fetched only after the checkpoint for page 2 was written
    let cancel = CancellationToken::new();
    let catalog = five_page_catalog();
    let page3 = catalog.listing_url(3);
    let catalog = catalog.with_fetcher(|f| f.cancel_when_requested(page3, cancel.clone()));

    let outcome = orchestrator(config, catalog, cancel).run().await;

    assert_eq!(outcome.status, CompletionStatus::Interrupted);
    let checkpoint = store.load().await.unwrap();
    assert_eq!(checkpoint.last_page_index, 2);
    assert_eq!(checkpoint.start_url.as_deref(), Some(START));
}

#[tokio::test]
async fn interrupt_keeps_finished_detail_pages_of_the_current_page() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.crawling.min_concurrency = 1;
    config.crawling.max_concurrency = 1;
    config.crawling.max_pages = Some(1);
    let store = CheckpointStore::new(config.checkpoint.path.clone());

    let links: Vec<String> = (0..10).map(|i| ScriptedCatalog::product_url(1, i)).collect();
    let one_page = || {
        ScriptedCatalog::new(START).with_fetcher(|mut fetcher| {
            fetcher = fetcher.page(START, listing_body(&links));
            for (i, link) in links.iter().enumerate() {
                fetcher = fetcher.page(link.clone(), detail_body(&format!("Item {i}")));
            }
            fetcher
        })
    };

    // the signal arrives while the seventh detail page is requested
    let cancel = CancellationToken::new();
    let catalog = one_page().with_fetcher(|f| f.cancel_when_requested(links[6].clone(), cancel.clone()));

    let interrupted = orchestrator(config.clone(), catalog, cancel).run().await;

    assert_eq!(interrupted.status, CompletionStatus::Interrupted);
    assert!(interrupted.record_count() >= 6, "kept {}", interrupted.record_count());
    assert!(interrupted.record_count() < 10);
    assert_eq!(interrupted.last_page_index, 0);

    let checkpoint = store.load().await.expect("checkpoint written on interrupt");
    assert_eq!(checkpoint.last_page_index, 0);
    assert_eq!(checkpoint.records.len(), interrupted.record_count());
    assert_eq!(checkpoint.seen_keys.len(), interrupted.record_count());

    // resume revisits page 1 and fetches only the unfinished products
    let catalog = one_page();
    let requests = catalog.probe();

    let resumed = orchestrator(config, catalog, CancellationToken::new()).run().await;

    assert_eq!(resumed.resumed_from, Some(1));
    assert_eq!(resumed.record_count(), 10);
    assert_eq!(resumed.status, CompletionStatus::Completed);
    assert!(links[..6].iter().all(|link| !requests.requested().contains(link)));
}
