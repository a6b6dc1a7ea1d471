//! # Adaptive Concurrency Controller
//!
//! 최근 응답 지연과 오류 수를 바탕으로 동시 요청 수를 조절한다.
//! - 성공한 요청의 지연만 FIFO 윈도우에 기록
//! - 실패 시 오류 카운터 증가, 성공 시 감소 (0 하한)
//! - 매 기록 후 규칙을 한 번 적용하고 [min, max]로 클램프

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::infrastructure::config::RateControlConfig;

/// Snapshot of the controller state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyState {
    pub current_level: usize,
    pub min: usize,
    pub max: usize,
    pub recent_latencies: VecDeque<Duration>,
    pub recent_error_count: u32,
}

impl ConcurrencyState {
    pub fn mean_latency(&self) -> Option<Duration> {
        let count = u32::try_from(self.recent_latencies.len()).ok().filter(|c| *c > 0)?;
        Some(self.recent_latencies.iter().sum::<Duration>() / count)
    }
}

pub struct RateController {
    state: Mutex<ConcurrencyState>,
    config: RateControlConfig,
}

impl RateController {
    /// Starts at `2 * min`, clamped to `max`
    pub fn new(min: usize, max: usize, config: RateControlConfig) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            state: Mutex::new(ConcurrencyState {
                current_level: min.saturating_mul(2).min(max),
                min,
                max,
                recent_latencies: VecDeque::with_capacity(config.window_size),
                recent_error_count: 0,
            }),
            config,
        }
    }

    // 패닉한 작업이 있어도 상태는 항상 일관적이므로 poison을 무시한다
    fn lock(&self) -> MutexGuard<'_, ConcurrencyState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn current_level(&self) -> usize {
        self.lock().current_level
    }

    pub fn snapshot(&self) -> ConcurrencyState {
        self.lock().clone()
    }

    /// Records one request outcome and returns the new level
    pub fn record(&self, elapsed: Duration, success: bool) -> usize {
        let mut state = self.lock();

        if success {
            if state.recent_latencies.len() >= self.config.window_size {
                state.recent_latencies.pop_front();
            }
            state.recent_latencies.push_back(elapsed);
            state.recent_error_count = state.recent_error_count.saturating_sub(1);
        } else {
            state.recent_error_count = state.recent_error_count.saturating_add(1);
        }

        let previous = state.current_level;
        let next = self.next_level(&state);
        state.current_level = next.clamp(state.min, state.max);

        if state.current_level != previous {
            debug!(
                "🎚️ Concurrency {} → {} (errors: {}, window: {})",
                previous,
                state.current_level,
                state.recent_error_count,
                state.recent_latencies.len()
            );
        }
        state.current_level
    }

    fn next_level(&self, state: &ConcurrencyState) -> usize {
        let level = state.current_level;
        let mean = state.mean_latency();

        if state.recent_error_count > self.config.error_threshold {
            return level.saturating_sub(self.config.error_decrease_step);
        }

        let warmed_up = state.recent_latencies.len() >= self.config.warmup_samples;
        let fast = Duration::from_millis(self.config.fast_threshold_ms);
        if warmed_up && state.recent_error_count == 0 && mean.is_some_and(|m| m < fast) {
            return level.saturating_add(self.config.increase_step);
        }

        let slow = Duration::from_millis(self.config.slow_threshold_ms);
        if mean.is_some_and(|m| m > slow) {
            return level.saturating_sub(self.config.slow_decrease_step);
        }

        level
    }
}
