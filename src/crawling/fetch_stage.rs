//! # Fetch Stage
//!
//! Bounded-concurrency HTTP fetch of a URL batch.
//! - 동시 실행 수는 매 디스패치마다 `RateController::current_level()`로 재확인
//! - 요청별 전체 타임아웃, 디스패치 간 페이싱
//! - 입력 URL 하나당 정확히 하나의 `FetchResult`
//! - 취소 시 신규 디스패치 중단, 진행 중 요청은 유예 시간 후 중단

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawling::rate_controller::RateController;
use crate::domain::ports::{FetchFailure, PageFetcher};
use crate::infrastructure::config::CrawlingConfig;

/// Page type, selects the pacing delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageKind {
    Listing,
    Detail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub attempt: u32,
}

impl FetchRequest {
    pub fn first(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            attempt: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    HttpError(u16),
    NetworkError(String),
    Timeout,
    /// Not dispatched, or abandoned after the shutdown grace period
    Cancelled,
}

impl FetchStatus {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub status: FetchStatus,
    pub body: Option<String>,
    pub elapsed: Duration,
    pub attempt: u32,
}

impl FetchResult {
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    fn without_body(request: FetchRequest, status: FetchStatus) -> Self {
        Self {
            url: request.url,
            status,
            body: None,
            elapsed: Duration::ZERO,
            attempt: request.attempt,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchStageConfig {
    pub request_timeout: Duration,
    pub listing_pace_delay: Duration,
    pub detail_pace_delay: Duration,
    pub shutdown_grace: Duration,
}

impl FetchStageConfig {
    pub fn from_crawling(config: &CrawlingConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            listing_pace_delay: config.listing_pace_delay(),
            detail_pace_delay: config.detail_pace_delay(),
            shutdown_grace: config.shutdown_grace(),
        }
    }

    const fn pace_for(&self, kind: PageKind) -> Duration {
        match kind {
            PageKind::Listing => self.listing_pace_delay,
            PageKind::Detail => self.detail_pace_delay,
        }
    }
}

pub struct FetchStage {
    fetcher: Arc<dyn PageFetcher>,
    controller: Arc<RateController>,
    config: FetchStageConfig,
}

/// Bookkeeping for one `fetch_all` call
struct Batch {
    in_flight: HashMap<usize, FetchRequest>,
    results: Vec<FetchResult>,
}

impl Batch {
    fn collect(&mut self, joined: Result<(usize, FetchResult), JoinError>) {
        match joined {
            Ok((index, result)) => {
                self.in_flight.remove(&index);
                self.results.push(result);
            }
            Err(e) if e.is_panic() => warn!("❌ Fetch task panicked: {}", e),
            // aborted tasks are settled from `in_flight` afterwards
            Err(_) => {}
        }
    }
}

impl FetchStage {
    pub fn new(fetcher: Arc<dyn PageFetcher>, controller: Arc<RateController>, config: FetchStageConfig) -> Self {
        Self {
            fetcher,
            controller,
            config,
        }
    }

    pub fn controller(&self) -> &Arc<RateController> {
        &self.controller
    }

    /// Fetches every URL once
    pub async fn fetch_all(&self, urls: Vec<String>, kind: PageKind, cancel: &CancellationToken) -> Vec<FetchResult> {
        self.fetch_requests(urls.into_iter().map(FetchRequest::first).collect(), kind, cancel)
            .await
    }

    pub async fn fetch_requests(
        &self,
        requests: Vec<FetchRequest>,
        kind: PageKind,
        cancel: &CancellationToken,
    ) -> Vec<FetchResult> {
        let total = requests.len();
        let started = Instant::now();
        let pace = self.config.pace_for(kind);

        let mut pending: VecDeque<(usize, FetchRequest)> = requests.into_iter().enumerate().collect();
        let mut join_set: JoinSet<(usize, FetchResult)> = JoinSet::new();
        let mut batch = Batch {
            in_flight: HashMap::new(),
            results: Vec::with_capacity(total),
        };
        let mut dispatched = 0usize;

        'dispatch: while !pending.is_empty() {
            if cancel.is_cancelled() {
                break;
            }

            // 토큰이 비기를 기다림 (레벨은 매번 다시 읽는다)
            while join_set.len() >= self.controller.current_level() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break 'dispatch,
                    Some(joined) = join_set.join_next() => batch.collect(joined),
                }
            }

            if dispatched > 0 && !pace.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break 'dispatch,
                    () = tokio::time::sleep(pace) => {}
                }
            }

            let Some((index, request)) = pending.pop_front() else {
                break;
            };
            batch.in_flight.insert(index, request.clone());
            join_set.spawn(Self::fetch_one(
                Arc::clone(&self.fetcher),
                Arc::clone(&self.controller),
                self.config.request_timeout,
                index,
                request,
            ));
            dispatched += 1;
        }

        self.drain(&mut join_set, &mut batch, cancel).await;

        // 남은 항목은 모두 실패로 확정
        let cancelled = cancel.is_cancelled();
        for (_, request) in batch.in_flight.drain() {
            let status = if cancelled {
                FetchStatus::Cancelled
            } else {
                FetchStatus::NetworkError("fetch task failed".to_string())
            };
            batch.results.push(FetchResult::without_body(request, status));
        }
        for (_, request) in pending {
            batch.results.push(FetchResult::without_body(request, FetchStatus::Cancelled));
        }

        let succeeded = batch.results.iter().filter(|r| r.is_success()).count();
        info!(
            "✅ Fetched {:?} batch: {}/{} ok in {:.2}s (concurrency now {})",
            kind,
            succeeded,
            total,
            started.elapsed().as_secs_f64(),
            self.controller.current_level()
        );
        debug_assert_eq!(batch.results.len(), total);
        batch.results
    }

    /// Waits for in-flight requests; once cancelled, only for the grace period
    async fn drain(
        &self,
        join_set: &mut JoinSet<(usize, FetchResult)>,
        batch: &mut Batch,
        cancel: &CancellationToken,
    ) {
        let mut deadline: Option<tokio::time::Instant> = None;

        while !join_set.is_empty() {
            if deadline.is_none() && cancel.is_cancelled() {
                debug!("🛑 Cancelled with {} requests in flight, grace {:?}", join_set.len(), self.config.shutdown_grace);
                deadline = Some(tokio::time::Instant::now() + self.config.shutdown_grace);
            }

            match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                    Ok(Some(joined)) => batch.collect(joined),
                    Ok(None) => break,
                    Err(_) => {
                        warn!("⚠️ Grace period elapsed, aborting {} requests", join_set.len());
                        join_set.abort_all();
                        while let Some(joined) = join_set.join_next().await {
                            batch.collect(joined);
                        }
                    }
                },
                None => {
                    tokio::select! {
                        biased;
                        joined = join_set.join_next() => {
                            if let Some(joined) = joined {
                                batch.collect(joined);
                            }
                        }
                        () = cancel.cancelled() => {}
                    }
                }
            }
        }
    }

    async fn fetch_one(
        fetcher: Arc<dyn PageFetcher>,
        controller: Arc<RateController>,
        timeout: Duration,
        index: usize,
        request: FetchRequest,
    ) -> (usize, FetchResult) {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, fetcher.fetch_page(&request.url)).await;
        let elapsed = started.elapsed();

        let (status, body) = match outcome {
            Ok(Ok(body)) => (FetchStatus::Success, Some(body)),
            Ok(Err(FetchFailure::Http(code))) => (FetchStatus::HttpError(code), None),
            Ok(Err(FetchFailure::Network(reason))) => (FetchStatus::NetworkError(reason), None),
            Ok(Err(FetchFailure::Timeout)) | Err(_) => (FetchStatus::Timeout, None),
        };

        controller.record(elapsed, status.is_success());
        if !status.is_success() {
            debug!("Fetch failed for {}: {:?}", request.url, status);
        }

        (
            index,
            FetchResult {
                url: request.url,
                status,
                body,
                elapsed,
                attempt: request.attempt,
            },
        )
    }
}
