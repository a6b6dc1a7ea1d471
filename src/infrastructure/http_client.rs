//! HTTP client for catalog crawling
//!
//! reqwest client with an optional global request ceiling (governor token
//! bucket). Adaptive concurrency lives in the fetch stage; this ceiling is a
//! hard cap on top of it.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;

use crate::domain::ports::{FetchFailure, PageFetcher};
use crate::infrastructure::config::AppConfig;

/// HTTP client configuration for crawling
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

impl HttpClientConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            user_agent: config.http.user_agent.clone(),
            timeout: config.crawling.request_timeout(),
            max_requests_per_second: config.http.max_requests_per_second,
            follow_redirects: config.http.follow_redirects,
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

pub struct HttpClient {
    client: Client,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .cookie_store(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .context("Failed to create HTTP client")?;

        let rate_limiter = NonZeroU32::new(config.max_requests_per_second)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchFailure> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        tracing::debug!("🌐 Fetching URL: {}", url);

        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("HTTP {} for {}", status, url);
            return Err(FetchFailure::Http(status.as_u16()));
        }

        let text = response.text().await.map_err(classify)?;
        tracing::debug!("Successfully fetched: {} ({} chars)", url, text.len());
        Ok(text)
    }
}

fn classify(error: reqwest::Error) -> FetchFailure {
    if error.is_timeout() {
        FetchFailure::Timeout
    } else if let Some(status) = error.status() {
        FetchFailure::Http(status.as_u16())
    } else {
        FetchFailure::Network(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_from_defaults() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        assert_eq!(client.config().timeout, Duration::from_secs(6));
        assert!(client.rate_limiter.is_none());
    }

    #[test]
    fn test_rate_ceiling_enabled_when_configured() {
        let config = HttpClientConfig {
            max_requests_per_second: 5,
            ..HttpClientConfig::default()
        };
        let client = HttpClient::new(config).unwrap();
        assert!(client.rate_limiter.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_failure() {
        let client = HttpClient::new(HttpClientConfig {
            timeout: Duration::from_millis(500),
            ..HttpClientConfig::default()
        })
        .unwrap();
        // port 9 (discard) on localhost is not expected to accept HTTP
        let result = client.fetch_page("http://127.0.0.1:9/").await;
        assert!(matches!(
            result,
            Err(FetchFailure::Network(_) | FetchFailure::Timeout)
        ));
    }
}
