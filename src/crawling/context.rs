//! Pipeline context
//!
//! 설정과 협력 객체를 명시적으로 묶어 각 스테이지 생성자에 전달한다.
//! 전역 싱글턴 없음.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::rate_controller::RateController;
use super::CrawlError;
use crate::domain::ports::{PageExtractor, PageFetcher};
use crate::infrastructure::checkpoint_store::CheckpointStore;
use crate::infrastructure::config::AppConfig;

#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<AppConfig>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub extractor: Arc<dyn PageExtractor>,
    pub controller: Arc<RateController>,
    pub checkpoint_store: CheckpointStore,
    pub cancel: CancellationToken,
}

impl PipelineContext {
    pub fn builder() -> PipelineContextBuilder {
        PipelineContextBuilder::default()
    }
}

/// 컨텍스트 빌더
#[derive(Default)]
pub struct PipelineContextBuilder {
    config: Option<Arc<AppConfig>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    extractor: Option<Arc<dyn PageExtractor>>,
    checkpoint_store: Option<CheckpointStore>,
    cancel: Option<CancellationToken>,
}

impl PipelineContextBuilder {
    #[must_use]
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Defaults to the path in the configuration
    #[must_use]
    pub fn checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Defaults to a fresh token
    #[must_use]
    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<PipelineContext, CrawlError> {
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|e| CrawlError::InvalidConfig(e.to_string()))?;

        let fetcher = self.fetcher.ok_or(CrawlError::MissingComponent("fetcher"))?;
        let extractor = self.extractor.ok_or(CrawlError::MissingComponent("extractor"))?;
        let controller = Arc::new(RateController::new(
            config.crawling.min_concurrency,
            config.crawling.max_concurrency,
            config.rate_control.clone(),
        ));
        let checkpoint_store = self
            .checkpoint_store
            .unwrap_or_else(|| CheckpointStore::new(config.checkpoint.path.clone()));

        Ok(PipelineContext {
            config,
            fetcher,
            extractor,
            controller,
            checkpoint_store,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedExtractor, ScriptedFetcher};

    #[test]
    fn test_missing_fetcher_is_reported() {
        let result = PipelineContext::builder()
            .extractor(Arc::new(ScriptedExtractor))
            .build();
        assert!(matches!(result, Err(CrawlError::MissingComponent("fetcher"))));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.crawling.min_concurrency = 0;
        let result = PipelineContext::builder()
            .config(config)
            .fetcher(Arc::new(ScriptedFetcher::new()))
            .extractor(Arc::new(ScriptedExtractor))
            .build();
        assert!(matches!(result, Err(CrawlError::InvalidConfig(_))));
    }

    #[test]
    fn test_controller_follows_config() {
        let mut config = AppConfig::default();
        config.crawling.min_concurrency = 4;
        config.crawling.max_concurrency = 6;
        let context = PipelineContext::builder()
            .config(config)
            .fetcher(Arc::new(ScriptedFetcher::new()))
            .extractor(Arc::new(ScriptedExtractor))
            .build()
            .unwrap();
        assert_eq!(context.controller.current_level(), 6);
        assert_eq!(context.checkpoint_store.path(), std::path::Path::new("crawl_checkpoint.json"));
    }
}
