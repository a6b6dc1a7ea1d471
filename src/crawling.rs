//! # Crawl Pipeline
//!
//! 적응형 동시 수집 파이프라인
//! - `RateController`: 지연/오류 기반 동시성 조절
//! - `FetchStage`: 동시성 제한 HTTP 수집
//! - `ExtractionStage`: rayon 풀 기반 병렬 추출
//! - `Deduplicator`: DedupKey 기준 중복 제거
//! - `CrawlOrchestrator`: 페이지 루프, 중단 조건, 체크포인트

use thiserror::Error;

pub mod context;
pub mod deduplicator;
pub mod extraction_stage;
pub mod fetch_stage;
pub mod orchestrator;
pub mod rate_controller;

pub use context::{PipelineContext, PipelineContextBuilder};
pub use deduplicator::{merge, Deduplicator};
pub use extraction_stage::{ExtractionOutcome, ExtractionStage, FetchedPage, PageLinks};
pub use fetch_stage::{FetchRequest, FetchResult, FetchStage, FetchStageConfig, FetchStatus, PageKind};
pub use orchestrator::{CrawlOrchestrator, CrawlOutcome};
pub use rate_controller::{ConcurrencyState, RateController};

/// Pipeline setup errors. Per-page failures never surface here.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Pipeline component not provided: {0}")]
    MissingComponent(&'static str),

    #[error("Failed to build extraction pool: {0}")]
    ThreadPool(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
