//! HTTP fetch capability + opportunity record stores for FOF.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

mod pg;
mod store;

pub use pg::PgStore;
pub use store::{JsonFileStore, MemoryStore, OpportunityStore, StoreError};

pub const CRATE_NAME: &str = "fof-storage";

/// Government portals routinely reject non-browser clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// One bounded GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// GET with a browser-like `User-Agent`, which government portals expect.
    pub fn browser(url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(url)
            .with_header("User-Agent", BROWSER_USER_AGENT)
            .with_header("Accept", "text/html,application/xhtml+xml")
            .with_timeout(timeout)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("fetcher is shutting down")]
    Closed,
}

/// Minimal "fetch text over HTTP" capability adapters and extraction depend on.
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Retries are off by default: a failing candidate path is cheaper to skip
/// than to hammer.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
    pub backoff: BackoffPolicy,
    /// Unset means no pacing beyond the concurrency limits.
    pub request_rate: Option<RequestRate>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: Some(BROWSER_USER_AGENT.to_string()),
            global_concurrency: 16,
            per_host_concurrency: 2,
            backoff: BackoffPolicy::default(),
            request_rate: None,
        }
    }
}

/// Courtesy ceiling on outgoing requests: up to `burst` back to back, then
/// one per `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRate {
    pub burst: u32,
    pub interval: Duration,
}

/// Hands out request slots at a [`RequestRate`]. A caller past the burst
/// reserves the next free slot and sleeps until it comes round.
#[derive(Debug)]
pub struct RequestPacer {
    rate: RequestRate,
    /// When the slot after the last reserved one opens.
    next_slot: Mutex<Instant>,
}

impl RequestPacer {
    pub fn new(rate: RequestRate) -> Self {
        Self {
            rate,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits for this caller's slot and returns how long that took.
    pub async fn wait_turn(&self) -> Duration {
        let delay = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next_slot).max(now);
            let slack = self.rate.interval.saturating_mul(self.rate.burst.saturating_sub(1));
            *next_slot = slot + self.rate.interval;
            slot.saturating_duration_since(now).saturating_sub(slack)
        };
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "pacing request");
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

/// reqwest-backed [`HttpGet`] with global + per-host concurrency limits.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    pacer: Option<RequestPacer>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_host_limit: config.per_host_concurrency.max(1),
            per_host: Mutex::new(HashMap::new()),
            pacer: config.request_rate.map(RequestPacer::new),
            backoff: config.backoff,
        })
    }

    pub fn request_rate(&self) -> Option<RequestRate> {
        self.pacer.as_ref().map(|pacer| pacer.rate)
    }

    /// Raw reqwest client, for callers that need more than GET.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn per_host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.per_host.lock().await;
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    async fn send_with_backoff(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            let mut builder = self.client.get(&request.url).timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        debug!(status = status.as_u16(), bytes = body.len(), "fetched");
                        return Ok(FetchedResponse {
                            status: status.as_u16(),
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl HttpGet for HttpFetcher {
    async fn get(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        let parsed = reqwest::Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_host = self.per_host_semaphore(&host).await;
        let _host = per_host.acquire().await.map_err(|_| FetchError::Closed)?;

        if let Some(pacer) = &self.pacer {
            pacer.wait_turn().await;
        }

        let span = info_span!("http_fetch", url = %request.url, host = %host);
        self.send_with_backoff(request).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn default_policy_is_single_attempt() {
        assert_eq!(BackoffPolicy::default().max_retries, 0);
    }

    #[test]
    fn only_server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[test]
    fn browser_requests_carry_user_agent_and_timeout() {
        let request = FetchRequest::browser("https://www.education.go.ke/bursaries", Duration::from_secs(15));
        assert_eq!(request.timeout, Duration::from_secs(15));
        assert!(request
            .headers
            .iter()
            .any(|(name, value)| name == "User-Agent" && value == BROWSER_USER_AGENT));
    }

    #[tokio::test]
    async fn invalid_urls_fail_before_any_io() {
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).expect("fetcher");
        let err = fetcher.get(&FetchRequest::new("not a url")).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_allows_a_burst_then_spaces_requests() {
        let pacer = RequestPacer::new(RequestRate {
            burst: 2,
            interval: Duration::from_secs(60),
        });
        let started = Instant::now();

        assert_eq!(pacer.wait_turn().await, Duration::ZERO);
        assert_eq!(pacer.wait_turn().await, Duration::ZERO);
        assert_eq!(pacer.wait_turn().await, Duration::from_secs(60));
        assert!(started.elapsed() >= Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(pacer.wait_turn().await, Duration::ZERO);
    }

    #[test]
    fn fetcher_is_unpaced_by_default() {
        assert_eq!(HttpClientConfig::default().request_rate, None);
    }
}
