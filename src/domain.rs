//! # Domain Module
//!
//! 크롤링 파이프라인의 핵심 데이터 모델
//! - 제품 레코드와 중복 제거 키
//! - 크롤링 진행 상태와 체크포인트
//! - 목록 페이지 URL 생성 규칙
//! - 외부 협력자(fetcher / extractor) 인터페이스

pub mod crawl_state;
pub mod pagination;
pub mod ports;
pub mod product;

pub use crawl_state::{CompletionStatus, CrawlCheckpoint, CrawlPhase, StopReason};
pub use pagination::ListingUrlTemplate;
pub use ports::{FetchFailure, PageExtractor, PageFetcher};
pub use product::{DedupKey, FieldMap, FieldName, FieldValue, Price, ProductRecord};
