// src/services/fetcher.rs

//! Sequential roster fetcher with per-source retry.
//!
//! Sources are fetched one after another with a fixed delay between them.
//! Upstream endpoints are third-party and rate limited, so requests are never
//! issued in parallel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::{Instant, sleep};
use url::Url;

use crate::error::{FetchError, Result};
use crate::models::{CycleFetchResult, FetcherConfig, RawFetchResult, SourceDescriptor};
use crate::utils::http::create_async_client;

/// Minimal upstream transport: one GET returning a status and a JSON body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> std::result::Result<(u16, Value), FetchError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &FetcherConfig) -> Result<Self> {
        Ok(Self::new(create_async_client(config)?))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> std::result::Result<(u16, Value), FetchError> {
        let limit_ms = timeout.as_millis() as u64;
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(limit_ms)
            } else if e.is_decode() {
                FetchError::Decode(e.to_string())
            } else {
                FetchError::Request(e.to_string())
            }
        };

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.json::<Value>().await.map_err(classify)?;
        Ok((status.as_u16(), body))
    }
}

/// Per-call overrides for [`RetryingFetcher::fetch_all`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Replaces the fetcher's per-request timeout
    pub timeout: Option<Duration>,
}

/// Fetches every source in order, isolating per-source failures.
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    name: String,
    timeout: Duration,
}

impl RetryingFetcher {
    pub fn new(transport: Arc<dyn Transport>, name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            name: name.into(),
            timeout,
        }
    }

    /// Build an HTTP-backed fetcher from configuration.
    pub fn from_config(config: &FetcherConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(
            Arc::new(transport),
            &config.name,
            Duration::from_millis(config.timeout_ms),
        ))
    }

    /// Fetch each source once, waiting `delay` between sources.
    pub async fn fetch_all(
        &self,
        sources: &[SourceDescriptor],
        delay: Duration,
        options: &FetchOptions,
    ) -> CycleFetchResult {
        log::info!(
            "[API FETCHER] - {} - Starting fetch for {} sources with {}ms delay",
            self.name,
            sources.len(),
            delay.as_millis()
        );
        let timeout = options.timeout.unwrap_or(self.timeout);
        self.run(sources, delay, timeout, 0).await
    }

    /// Fetch each source with up to `max_retries` extra attempts.
    ///
    /// Attempt `n + 1` waits `delay * n` after attempt `n` fails.
    pub async fn fetch_all_with_retry(
        &self,
        sources: &[SourceDescriptor],
        delay: Duration,
        max_retries: u32,
    ) -> CycleFetchResult {
        log::info!(
            "[API FETCHER] - {} - Starting fetch with retry (max {} retries)",
            self.name,
            max_retries
        );
        self.run(sources, delay, self.timeout, max_retries).await
    }

    async fn run(
        &self,
        sources: &[SourceDescriptor],
        delay: Duration,
        timeout: Duration,
        max_retries: u32,
    ) -> CycleFetchResult {
        let started = Instant::now();
        let mut results = Vec::with_capacity(sources.len());

        for (i, source) in sources.iter().enumerate() {
            let mut attempt: u32 = 0;
            let result = loop {
                attempt += 1;
                if attempt > 1 {
                    log::info!(
                        "[RETRY] - {} - Attempt {} for {}",
                        self.name,
                        attempt,
                        source.tag()
                    );
                }

                match self.fetch_one(source, timeout).await {
                    Ok((status, payload)) => {
                        break RawFetchResult::success(source, status, payload, attempt);
                    }
                    Err(error) if attempt > max_retries => {
                        break RawFetchResult::failure(source, &error, attempt);
                    }
                    Err(_) => sleep(delay.saturating_mul(attempt)).await,
                }
            };
            results.push(result);

            if i + 1 < sources.len() && !delay.is_zero() {
                log::debug!(
                    "[DELAY] - {} - Waiting {}ms before next source...",
                    self.name,
                    delay.as_millis()
                );
                sleep(delay).await;
            }
        }

        let total_time_ms = started.elapsed().as_millis() as u64;
        let fetch = CycleFetchResult::new(&self.name, results, total_time_ms);
        log::info!(
            "[COMPLETED] - {} - Fetch completed in {}ms (success: {} | failed: {})",
            self.name,
            total_time_ms,
            fetch.summary.successful,
            fetch.summary.failed
        );
        fetch
    }

    async fn fetch_one(
        &self,
        source: &SourceDescriptor,
        timeout: Duration,
    ) -> std::result::Result<(u16, Value), FetchError> {
        log::info!(
            "[FETCH] - {} - Fetching: {} ({})",
            self.name,
            source.tag(),
            source.endpoint()
        );

        match self.transport.get_json(source.endpoint(), timeout).await {
            Ok((status, payload)) => {
                let items = match &payload {
                    Value::Array(items) => items.len(),
                    _ => 1,
                };
                log::info!(
                    "[SUCCESS] - {} - {} - {} items",
                    self.name,
                    source.tag(),
                    items
                );
                Ok((status, payload))
            }
            Err(error) => {
                log::error!("[ERROR] - {} - {} - {}", self.name, source.tag(), error);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Transport that replays scripted responses per URL and records call times.
    struct Scripted {
        script: Mutex<Vec<(String, std::result::Result<Value, FetchError>)>>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl Scripted {
        fn new(script: Vec<(&str, std::result::Result<Value, FetchError>)>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|(tag, r)| (tag.to_string(), r))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn get_json(
            &self,
            url: &Url,
            _timeout: Duration,
        ) -> std::result::Result<(u16, Value), FetchError> {
            let tag = url.path().trim_start_matches('/').to_string();
            self.calls.lock().push((tag.clone(), Instant::now()));
            let mut script = self.script.lock();
            let pos = script
                .iter()
                .position(|(t, _)| *t == tag)
                .expect("unscripted call");
            let (_, response) = script.remove(pos);
            response.map(|v| (200, v))
        }
    }

    fn sources(tags: &[&str]) -> Vec<SourceDescriptor> {
        tags.iter()
            .map(|t| SourceDescriptor::parse(t, &format!("https://example.com/{t}")).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_all_keeps_order_and_isolates_failures() {
        let transport = Arc::new(Scripted::new(vec![
            ("A", Ok(json!([{"Uid": "1"}]))),
            ("B", Err(FetchError::Timeout(800))),
            ("C", Ok(json!({"Uid": "2"}))),
        ]));
        let fetcher = RetryingFetcher::new(transport.clone(), "test", Duration::from_millis(800));

        let fetch = fetcher
            .fetch_all(
                &sources(&["A", "B", "C"]),
                Duration::from_secs(1),
                &FetchOptions::default(),
            )
            .await;

        let tags: Vec<_> = fetch.results.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, ["A", "B", "C"]);
        assert!(!fetch.results[1].succeeded);
        assert_eq!(fetch.summary.successful, 2);
        assert_eq!(fetch.summary.failed, 1);

        // Delay after every source except the last.
        let calls = transport.calls.lock();
        assert_eq!(calls[1].1 - calls[0].1, Duration::from_secs(1));
        assert_eq!(calls[2].1 - calls[1].1, Duration::from_secs(1));
        assert!(fetch.summary.total_time_ms >= 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backs_off_linearly() {
        let transport = Arc::new(Scripted::new(vec![
            ("A", Err(FetchError::Request("reset".into()))),
            ("A", Err(FetchError::Request("reset".into()))),
            ("A", Err(FetchError::Request("reset".into()))),
            ("A", Err(FetchError::Request("reset".into()))),
        ]));
        let fetcher = RetryingFetcher::new(transport.clone(), "test", Duration::from_millis(50));

        let fetch = fetcher
            .fetch_all_with_retry(&sources(&["A"]), Duration::from_millis(100), 3)
            .await;

        assert_eq!(fetch.results[0].attempts, 4);
        assert!(!fetch.results[0].succeeded);

        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 4);
        for i in 1..calls.len() {
            let waited = calls[i].1 - calls[i - 1].1;
            assert_eq!(waited, Duration::from_millis(100) * i as u32);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_success() {
        let transport = Arc::new(Scripted::new(vec![
            ("A", Err(FetchError::Timeout(50))),
            ("A", Ok(json!([]))),
            ("B", Ok(json!([]))),
        ]));
        let fetcher = RetryingFetcher::new(transport.clone(), "test", Duration::from_millis(50));

        let fetch = fetcher
            .fetch_all_with_retry(&sources(&["A", "B"]), Duration::from_millis(100), 2)
            .await;

        assert_eq!(fetch.results[0].attempts, 2);
        assert!(fetch.results[0].succeeded);
        assert_eq!(fetch.results[1].attempts, 1);

        // Backoff (100ms) then the inter-source delay (100ms).
        let calls = transport.calls.lock();
        assert_eq!(calls[2].1 - calls[1].1, Duration::from_millis(100));
    }
}
