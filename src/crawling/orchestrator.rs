//! # Crawl Orchestrator
//!
//! 리스팅 페이지 단위 크롤 루프:
//! 리스팅 수집 → 링크 추출 → 상세 수집 → 레코드 추출 → 중복 제거 → 체크포인트
//!
//! Stop conditions are evaluated after each page in priority order:
//! time budget, consecutive empty pages, target record count, page ceiling.
//! Consecutive listing failures stop the crawl as `Degraded`. A signal or the
//! time budget deadline cancels in-flight work at any phase; detail pages that
//! finished before the cancel are kept, and the interrupted listing page is
//! revisited on resume.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::context::PipelineContext;
use super::deduplicator::Deduplicator;
use super::extraction_stage::{ExtractionStage, FetchedPage};
use super::fetch_stage::{FetchRequest, FetchStage, FetchStageConfig, PageKind};
use super::CrawlError;
use crate::domain::crawl_state::{CompletionStatus, CrawlCheckpoint, CrawlPhase, StopReason};
use crate::domain::pagination::ListingUrlTemplate;
use crate::domain::product::{DedupKey, ProductRecord};

/// Upper bound of the random delay added before a listing retry
const RETRY_JITTER_MS: u64 = 250;

/// Final result of a crawl run
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub run_id: Uuid,
    pub records: Vec<ProductRecord>,
    pub stop_reason: StopReason,
    pub status: CompletionStatus,
    /// Listing pages fully processed in this run
    pub pages_processed: u32,
    pub last_page_index: u32,
    /// Includes time spent in earlier runs of a resumed crawl
    pub elapsed: Duration,
    /// Failure to write (or clear) the final checkpoint
    pub checkpoint_error: Option<String>,
    /// Page the crawl resumed at, if a checkpoint was loaded
    pub resumed_from: Option<u32>,
}

impl CrawlOutcome {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

/// Mutable progress of one run, owned by the orchestrator task
struct RunState {
    records: Vec<ProductRecord>,
    dedup: Deduplicator,
    last_page_index: u32,
    pages_processed: u32,
    consecutive_empty: u32,
    consecutive_failures: u32,
    since_checkpoint: usize,
    elapsed_before: Duration,
    started: Instant,
    resumed_from: Option<u32>,
}

impl RunState {
    fn fresh() -> Self {
        Self {
            records: Vec::new(),
            dedup: Deduplicator::new(),
            last_page_index: 0,
            pages_processed: 0,
            consecutive_empty: 0,
            consecutive_failures: 0,
            since_checkpoint: 0,
            elapsed_before: Duration::ZERO,
            started: Instant::now(),
            resumed_from: None,
        }
    }

    fn resumed(checkpoint: CrawlCheckpoint) -> Self {
        let resume_at = checkpoint.next_page_index();
        let mut dedup = Deduplicator::seeded(checkpoint.seen_keys);
        // 구버전 체크포인트는 records 없이 키만 가질 수 있다
        let records = checkpoint.records;
        dedup.absorb(records.clone());

        Self {
            records,
            dedup,
            last_page_index: checkpoint.last_page_index,
            elapsed_before: Duration::from_secs_f64(checkpoint.elapsed_so_far_secs.max(0.0)),
            resumed_from: Some(resume_at),
            ..Self::fresh()
        }
    }

    fn elapsed_total(&self) -> Duration {
        self.elapsed_before + self.started.elapsed()
    }
}

/// Result of processing one listing page
enum PageOutcome {
    Processed { new_records: usize },
    /// Listing fetch failed on every attempt
    Skipped,
    FailureLimit,
    Interrupted,
}

pub struct CrawlOrchestrator {
    context: PipelineContext,
    template: ListingUrlTemplate,
    fetch_stage: FetchStage,
    extraction_stage: ExtractionStage,
    phase_tx: watch::Sender<CrawlPhase>,
}

impl CrawlOrchestrator {
    pub fn new(context: PipelineContext, template: ListingUrlTemplate) -> Result<Self, CrawlError> {
        let fetch_stage = FetchStage::new(
            context.fetcher.clone(),
            context.controller.clone(),
            FetchStageConfig::from_crawling(&context.config.crawling),
        );
        let extraction_stage = ExtractionStage::new(context.extractor.clone(), &context.config.extraction)?;
        let (phase_tx, _) = watch::channel(CrawlPhase::Idle);

        Ok(Self {
            context,
            template,
            fetch_stage,
            extraction_stage,
            phase_tx,
        })
    }

    /// Receiver of phase transitions
    pub fn subscribe_phase(&self) -> watch::Receiver<CrawlPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> CrawlPhase {
        *self.phase_tx.borrow()
    }

    fn set_phase(&self, phase: CrawlPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            debug!("🔄 Phase {} → {}", previous, phase);
        }
    }

    pub async fn run(&self) -> CrawlOutcome {
        let run_id = Uuid::new_v4();
        self.run_loop(run_id)
            .instrument(tracing::info_span!("crawl", run_id = %run_id))
            .await
    }

    async fn run_loop(&self, run_id: Uuid) -> CrawlOutcome {
        let mut state = self.restore().await;
        let settings = &self.context.config.crawling;
        info!(
            "🚀 Starting crawl of {} at page {} (concurrency {}..{})",
            self.template.start_url(),
            state.last_page_index + 1,
            settings.min_concurrency,
            settings.max_concurrency
        );

        // 시간 예산 만료도 취소 신호로 전파한다
        let cancel = self.context.cancel.child_token();
        let budget_timer = settings.time_budget().map(|budget| {
            let token = cancel.clone();
            let deadline = tokio::time::Instant::now() + budget;
            tokio::spawn(
                async move {
                    tokio::select! {
                        () = token.cancelled() => {}
                        () = tokio::time::sleep_until(deadline) => {
                            info!("⏰ Time budget of {:?} exhausted, cancelling in-flight work", budget);
                            token.cancel();
                        }
                    }
                }
                .in_current_span(),
            )
        });

        let mut page = state.last_page_index.saturating_add(1);
        let stop_reason = loop {
            if settings.max_pages.is_some_and(|max| page > max) {
                break StopReason::PageCeilingReached;
            }
            if self.budget_exhausted(&state) {
                break StopReason::TimeBudgetExceeded;
            }
            if cancel.is_cancelled() {
                break self.interruption_reason();
            }

            match self.process_page(page, &mut state, &cancel).await {
                PageOutcome::Interrupted => break self.interruption_reason(),
                PageOutcome::FailureLimit => {
                    error!(
                        "❌ {} consecutive listing failures, stopping at page {}",
                        state.consecutive_failures, page
                    );
                    break StopReason::ConsecutiveFailures;
                }
                PageOutcome::Skipped => {
                    warn!("⚠️ Skipping listing page {} after failed retries", page);
                    state.last_page_index = page;
                }
                PageOutcome::Processed { new_records } => {
                    state.last_page_index = page;
                    state.pages_processed += 1;
                    state.since_checkpoint += new_records;
                    if new_records == 0 {
                        state.consecutive_empty += 1;
                    } else {
                        state.consecutive_empty = 0;
                    }
                    info!(
                        "📄 Page {}: {} new records ({} total, concurrency {})",
                        page,
                        new_records,
                        state.records.len(),
                        self.context.controller.current_level()
                    );
                }
            }

            self.periodic_checkpoint(&mut state).await;

            if let Some(reason) = self.stop_condition(&state) {
                break reason;
            }
            page = page.saturating_add(1);
        };

        if let Some(timer) = budget_timer {
            timer.abort();
        }
        self.finish(run_id, state, stop_reason).await
    }

    /// Loads the checkpoint of the same catalog, if any
    async fn restore(&self) -> RunState {
        let Some(checkpoint) = self.context.checkpoint_store.load().await else {
            return RunState::fresh();
        };

        if !checkpoint.matches_start_url(self.template.start_url()) {
            warn!(
                "⚠️ Checkpoint belongs to {:?}, starting {} fresh",
                checkpoint.start_url,
                self.template.start_url()
            );
            return RunState::fresh();
        }

        info!(
            "🔁 Resuming after page {} with {} records",
            checkpoint.last_page_index, checkpoint.accumulated_record_count
        );
        RunState::resumed(checkpoint)
    }

    /// A cancelled child token without a cancelled parent means the deadline fired
    fn interruption_reason(&self) -> StopReason {
        if self.context.cancel.is_cancelled() {
            StopReason::Interrupted
        } else {
            StopReason::TimeBudgetExceeded
        }
    }

    fn budget_exhausted(&self, state: &RunState) -> bool {
        self.context
            .config
            .crawling
            .time_budget()
            .is_some_and(|budget| state.started.elapsed() >= budget)
    }

    async fn process_page(&self, page: u32, state: &mut RunState, cancel: &CancellationToken) -> PageOutcome {
        let settings = &self.context.config.crawling;
        let listing_url = self.template.page_url(page);

        // 1. 리스팅 페이지 (실패 시 같은 페이지 재제출)
        let mut attempt = 1;
        let listing = loop {
            self.set_phase(CrawlPhase::FetchingListing);
            let request = FetchRequest {
                url: listing_url.clone(),
                attempt,
            };
            let result = self
                .fetch_stage
                .fetch_requests(vec![request], PageKind::Listing, cancel)
                .await
                .pop();
            if cancel.is_cancelled() {
                return PageOutcome::Interrupted;
            }

            match result {
                Some(result) if result.is_success() => {
                    state.consecutive_failures = 0;
                    break FetchedPage::new(result.url, result.body.unwrap_or_default());
                }
                other => {
                    state.consecutive_failures += 1;
                    warn!(
                        "⚠️ Listing page {} attempt {} failed: {:?}",
                        page,
                        attempt,
                        other.map(|r| r.status)
                    );
                    if state.consecutive_failures >= settings.max_consecutive_failures {
                        return PageOutcome::FailureLimit;
                    }
                    if attempt > settings.listing_retry_limit {
                        return PageOutcome::Skipped;
                    }
                    attempt += 1;

                    let delay = settings.listing_pace_delay() + Duration::from_millis(fastrand::u64(0..=RETRY_JITTER_MS));
                    tokio::select! {
                        () = cancel.cancelled() => return PageOutcome::Interrupted,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        // 2. 상품 링크
        self.set_phase(CrawlPhase::ExtractingLinks);
        let links = self
            .extraction_stage
            .extract_links(vec![listing.clone()])
            .await
            .into_iter()
            .next()
            .map(|page_links| page_links.links)
            .unwrap_or_default();

        let mut interrupted = false;
        let candidates = if links.is_empty() {
            // 링크가 없는 페이지는 리스팅 카드에서 바로 레코드를 만든다
            let outcome = self.extraction_stage.extract_listing_records(vec![listing]).await;
            debug!("Page {} has no product links, {} listing cards", page, outcome.records.len());
            outcome.records
        } else {
            let links = self.unseen_links(links, &state.dedup);
            if links.is_empty() {
                Vec::new()
            } else {
                // 3. 상세 페이지
                self.set_phase(CrawlPhase::FetchingDetails);
                let total = links.len();
                let results = self.fetch_stage.fetch_all(links, PageKind::Detail, cancel).await;
                interrupted = cancel.is_cancelled();

                let pages: Vec<FetchedPage> = results
                    .into_iter()
                    .filter_map(|r| match (r.status.is_success(), r.body) {
                        (true, Some(body)) => Some(FetchedPage::new(r.url, body)),
                        _ => None,
                    })
                    .collect();
                if pages.len() < total && !interrupted {
                    warn!("⚠️ Page {}: {}/{} detail fetches failed", page, total - pages.len(), total);
                }

                // 4. 레코드 추출
                self.set_phase(CrawlPhase::ExtractingRecords);
                let outcome = self.extraction_stage.extract(pages).await;
                if outcome.timed_out_chunks > 0 {
                    warn!("⏱️ Page {}: {} extraction chunks timed out", page, outcome.timed_out_chunks);
                }
                outcome.records
            }
        };

        let accepted = state.dedup.absorb(candidates);
        let new_records = accepted.len();
        state.records.extend(accepted);

        if interrupted {
            // last_page_index stays on the previous page; seen keys skip the finished links on resume
            info!("🛑 Page {} interrupted, kept {} finished records", page, new_records);
            return PageOutcome::Interrupted;
        }
        PageOutcome::Processed { new_records }
    }

    /// Distinct links not yet scraped in this crawl, capped per page
    fn unseen_links(&self, links: Vec<String>, dedup: &Deduplicator) -> Vec<String> {
        let mut batch = HashSet::new();
        let mut unseen: Vec<String> = links
            .into_iter()
            .filter(|link| {
                let key = DedupKey::for_url(link);
                !dedup.contains(&key) && batch.insert(key)
            })
            .collect();
        unseen.truncate(self.context.config.crawling.max_product_links_per_page);
        unseen
    }

    async fn periodic_checkpoint(&self, state: &mut RunState) {
        if state.since_checkpoint < self.context.config.crawling.checkpoint_interval {
            return;
        }
        self.set_phase(CrawlPhase::Checkpointing);
        match self.context.checkpoint_store.save(&self.checkpoint(state)).await {
            Ok(()) => info!("💾 Checkpoint after page {} ({} records)", state.last_page_index, state.records.len()),
            Err(e) => warn!("⚠️ Periodic checkpoint failed, continuing: {}", e),
        }
        state.since_checkpoint = 0;
    }

    fn stop_condition(&self, state: &RunState) -> Option<StopReason> {
        let settings = &self.context.config.crawling;

        if self.budget_exhausted(state) {
            return Some(StopReason::TimeBudgetExceeded);
        }
        if state.consecutive_empty >= settings.max_consecutive_empty_pages {
            return Some(StopReason::ConsecutiveEmptyPages);
        }
        if settings
            .target_record_count
            .is_some_and(|target| state.records.len() >= target)
        {
            return Some(StopReason::TargetReached);
        }
        if settings.max_pages.is_some_and(|max| state.last_page_index >= max) {
            return Some(StopReason::PageCeilingReached);
        }
        None
    }

    fn checkpoint(&self, state: &RunState) -> CrawlCheckpoint {
        CrawlCheckpoint {
            last_page_index: state.last_page_index,
            seen_keys: state.dedup.seen_keys(),
            accumulated_record_count: state.records.len(),
            timestamp: Utc::now(),
            elapsed_so_far_secs: state.elapsed_total().as_secs_f64(),
            start_url: Some(self.template.start_url().to_string()),
            records: state.records.clone(),
        }
    }

    async fn finish(&self, run_id: Uuid, state: RunState, stop_reason: StopReason) -> CrawlOutcome {
        let status = stop_reason.status();
        let store = &self.context.checkpoint_store;

        self.set_phase(CrawlPhase::Checkpointing);
        let checkpoint_error = if status.keeps_checkpoint() {
            store.save(&self.checkpoint(&state)).await.err().map(|e| {
                error!("❌ Final checkpoint failed: {}", e);
                e.to_string()
            })
        } else {
            store.clear().await.err().map(|e| {
                warn!("⚠️ Could not remove checkpoint: {}", e);
                e.to_string()
            })
        };
        self.set_phase(CrawlPhase::Stopped);

        let elapsed = state.elapsed_total();
        info!(
            "🏁 Crawl stopped: {:?} ({:?}), {} records, last page {}, {:.1}s",
            stop_reason,
            status,
            state.records.len(),
            state.last_page_index,
            elapsed.as_secs_f64()
        );

        CrawlOutcome {
            run_id,
            records: state.records,
            stop_reason,
            status,
            pages_processed: state.pages_processed,
            last_page_index: state.last_page_index,
            elapsed,
            checkpoint_error,
            resumed_from: state.resumed_from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::AppConfig;
    use crate::test_utils::{fast_config, listing_body, ScriptedCatalog, ScriptedExtractor, ScriptedFetcher};
    use std::sync::Arc;
    use tempfile::tempdir;

    const START: &str = "https://shop.test/shop/";

    fn orchestrator(config: AppConfig, fetcher: ScriptedFetcher) -> CrawlOrchestrator {
        let context = PipelineContext::builder()
            .config(config)
            .fetcher(Arc::new(fetcher))
            .extractor(Arc::new(ScriptedExtractor))
            .build()
            .unwrap();
        CrawlOrchestrator::new(context, ListingUrlTemplate::parse(START).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_target_reached_stops_and_clears_checkpoint() {
        let dir = tempdir().unwrap();
        let mut config = fast_config(dir.path());
        config.crawling.target_record_count = Some(5);
        let catalog = (1..=5).fold(ScriptedCatalog::new(START), |c, page| c.with_products(page, 3));

        let orchestrator = orchestrator(config, catalog.into_fetcher());
        let phases = orchestrator.subscribe_phase();
        let outcome = orchestrator.run().await;

        assert_eq!(outcome.stop_reason, StopReason::TargetReached);
        assert_eq!(outcome.status, CompletionStatus::Completed);
        assert_eq!(outcome.record_count(), 6);
        assert_eq!(outcome.last_page_index, 2);
        assert_eq!(*phases.borrow(), CrawlPhase::Stopped);
        assert!(!dir.path().join("checkpoint.json").exists());
    }

    #[tokio::test]
    async fn test_page_ceiling() {
        let dir = tempdir().unwrap();
        let mut config = fast_config(dir.path());
        config.crawling.max_pages = Some(2);
        let catalog = (1..=4).fold(ScriptedCatalog::new(START), |c, page| c.with_products(page, 2));

        let outcome = orchestrator(config, catalog.into_fetcher()).run().await;

        assert_eq!(outcome.stop_reason, StopReason::PageCeilingReached);
        assert_eq!(outcome.record_count(), 4);
        assert_eq!(outcome.pages_processed, 2);
    }

    #[tokio::test]
    async fn test_failed_listing_is_retried_then_skipped() {
        let dir = tempdir().unwrap();
        let mut config = fast_config(dir.path());
        config.crawling.max_pages = Some(3);
        let catalog = ScriptedCatalog::new(START).with_products(1, 2).with_products(3, 2);
        let page2 = catalog.listing_url(2);
        let fetcher = catalog.into_fetcher();
        let probe = fetcher.probe();

        let outcome = orchestrator(config, fetcher).run().await;

        assert_eq!(probe.requested().iter().filter(|u| **u == page2).count(), 2);
        assert_eq!(outcome.stop_reason, StopReason::PageCeilingReached);
        assert_eq!(outcome.record_count(), 4);
        assert_eq!(outcome.pages_processed, 2);
        assert_eq!(outcome.last_page_index, 3);
    }

    #[tokio::test]
    async fn test_seen_links_are_not_fetched_again() {
        let dir = tempdir().unwrap();
        let mut config = fast_config(dir.path());
        config.crawling.max_pages = Some(2);
        let shared = vec![ScriptedCatalog::product_url(1, 0)];
        let catalog = ScriptedCatalog::new(START).with_products(1, 1);
        let page2 = catalog.listing_url(2);
        let fetcher = catalog.into_fetcher().page(page2, listing_body(&shared));
        let probe = fetcher.probe();

        let outcome = orchestrator(config, fetcher).run().await;

        assert_eq!(outcome.record_count(), 1);
        assert_eq!(probe.requested().iter().filter(|u| **u == shared[0]).count(), 1);
    }

    #[tokio::test]
    async fn test_listing_cards_used_without_links() {
        let dir = tempdir().unwrap();
        let mut config = fast_config(dir.path());
        config.crawling.max_pages = Some(1);
        let fetcher = ScriptedFetcher::new().page(
            START,
            "CARD: Kettle | https://shop.test/product/kettle\nCARD: Iron |",
        );

        let outcome = orchestrator(config, fetcher).run().await;

        let urls: Vec<&str> = outcome.records.iter().map(|r| r.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://shop.test/product/kettle", START]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let context = PipelineContext::builder()
            .config(fast_config(dir.path()))
            .fetcher(Arc::new(ScriptedFetcher::new()))
            .extractor(Arc::new(ScriptedExtractor))
            .build()
            .unwrap();
        context.cancel.cancel();
        let orchestrator = CrawlOrchestrator::new(context, ListingUrlTemplate::parse(START).unwrap()).unwrap();

        let outcome = orchestrator.run().await;

        assert_eq!(outcome.status, CompletionStatus::Interrupted);
        assert_eq!(outcome.last_page_index, 0);
        assert!(outcome.checkpoint_error.is_none());
        assert!(dir.path().join("checkpoint.json").exists());
    }
}
