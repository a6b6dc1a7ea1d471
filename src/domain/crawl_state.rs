//! 크롤링 진행 상태 모델
//!
//! Phase transitions, stop reasons and the persisted checkpoint.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::product::{DedupKey, ProductRecord};

/// Orchestrator phases.
///
/// `Idle → FetchingListing → ExtractingLinks → FetchingDetails → ExtractingRecords
/// → Checkpointing → (FetchingListing | Stopped)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlPhase {
    Idle,
    FetchingListing,
    ExtractingLinks,
    FetchingDetails,
    ExtractingRecords,
    Checkpointing,
    Stopped,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::FetchingListing => "fetching-listing",
            Self::ExtractingLinks => "extracting-links",
            Self::FetchingDetails => "fetching-details",
            Self::ExtractingRecords => "extracting-records",
            Self::Checkpointing => "checkpointing",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Why the crawl loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    TimeBudgetExceeded,
    ConsecutiveEmptyPages,
    TargetReached,
    PageCeilingReached,
    ConsecutiveFailures,
    Interrupted,
}

impl StopReason {
    pub const fn status(self) -> CompletionStatus {
        match self {
            Self::ConsecutiveEmptyPages | Self::TargetReached | Self::PageCeilingReached => {
                CompletionStatus::Completed
            }
            // 시간 예산 초과는 재개 가능한 부분 완료로 취급
            Self::TimeBudgetExceeded | Self::Interrupted => CompletionStatus::Interrupted,
            Self::ConsecutiveFailures => CompletionStatus::Degraded,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TimeBudgetExceeded => "time budget exceeded",
            Self::ConsecutiveEmptyPages => "consecutive empty pages",
            Self::TargetReached => "target record count reached",
            Self::PageCeilingReached => "page ceiling reached",
            Self::ConsecutiveFailures => "too many consecutive listing failures",
            Self::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    Completed,
    Degraded,
    Interrupted,
}

impl CompletionStatus {
    /// Completed crawls discard their checkpoint; the others keep it for resumption
    pub const fn keeps_checkpoint(self) -> bool {
        !matches!(self, Self::Completed)
    }
}

/// Persisted crawl progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlCheckpoint {
    /// Last listing page fully processed (1-based, 0 = none)
    pub last_page_index: u32,
    pub seen_keys: Vec<DedupKey>,
    pub accumulated_record_count: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub elapsed_so_far_secs: f64,
    /// Catalog the checkpoint belongs to; a different start URL starts fresh
    #[serde(default)]
    pub start_url: Option<String>,
    #[serde(default)]
    pub records: Vec<ProductRecord>,
}

impl CrawlCheckpoint {
    pub fn next_page_index(&self) -> u32 {
        self.last_page_index.saturating_add(1)
    }

    pub fn matches_start_url(&self, start_url: &str) -> bool {
        self.start_url.as_deref().is_none_or(|url| url == start_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_status() {
        assert_eq!(StopReason::ConsecutiveEmptyPages.status(), CompletionStatus::Completed);
        assert_eq!(StopReason::PageCeilingReached.status(), CompletionStatus::Completed);
        assert_eq!(StopReason::ConsecutiveFailures.status(), CompletionStatus::Degraded);
        assert_eq!(StopReason::Interrupted.status(), CompletionStatus::Interrupted);
        assert!(StopReason::TimeBudgetExceeded.status().keeps_checkpoint());
        assert!(!CompletionStatus::Completed.keeps_checkpoint());
    }

    #[test]
    fn test_checkpoint_tolerates_missing_optional_fields() {
        let json = r#"{
            "last_page_index": 4,
            "seen_keys": ["url:https://shop.test/product/a", "name:lamp"],
            "accumulated_record_count": 2,
            "timestamp": "2024-05-01T10:00:00Z"
        }"#;
        let checkpoint: CrawlCheckpoint = serde_json::from_str(json).unwrap();
        assert_eq!(checkpoint.next_page_index(), 5);
        assert_eq!(checkpoint.seen_keys.len(), 2);
        assert!(checkpoint.records.is_empty());
        assert!(checkpoint.matches_start_url("https://anything.test"));
    }
}
