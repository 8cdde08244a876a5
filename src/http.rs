//! Rate-limited access to the remote API.
//!
//! Every network request the pipeline makes goes through [`Fetcher`]. The
//! transport itself sits behind [`HttpClient`] and wall-clock time behind
//! [`Clock`], so rate-limit waits can be driven by a manual clock in tests.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};

pub const RATE_LIMIT_RESET_HEADER: &str = "ratelimit-reset";
const API_REVISION_HEADER: &str = "wanikani-revision";
const API_REVISION: &str = "20170710";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Used when a 429 arrives without a readable reset header; the remote
/// budget is replenished per minute.
const FALLBACK_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    /// Header names are stored lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal GET transport. Errors are plain messages; the fetcher decides
/// what they mean for the cycle.
pub trait HttpClient: Send + Sync {
    fn get(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> impl Future<Output = std::result::Result<RawResponse, String>> + Send;
}

pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(API_REVISION_HEADER, HeaderValue::from_static(API_REVISION));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("vocabsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build http client: {}", e)))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    async fn get(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> std::result::Result<RawResponse, String> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| e.to_string())?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Issues authenticated GETs and absorbs the server's rate limiting.
///
/// A 429 suspends the caller until the instant named by `Ratelimit-Reset`
/// (plus `margin`) and then repeats the identical request. There is no attempt
/// cap; the loop ends when the server lets the request through or when the
/// cancellation token fires.
pub struct Fetcher<C, K = SystemClock> {
    client: C,
    clock: K,
    api_key: String,
    margin: Duration,
    cancel: CancellationToken,
}

impl<C: HttpClient, K: Clock> Fetcher<C, K> {
    pub fn new(client: C, clock: K, api_key: impl Into<String>) -> Self {
        Self {
            client,
            clock,
            api_key: api_key.into(),
            margin: Duration::ZERO,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sends the request, waiting out any 429s, and returns whatever non-429
    /// response the server settles on.
    pub async fn send(&self, url: &str) -> Result<RawResponse> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let response = self
                .client
                .get(url, Some(&self.api_key))
                .await
                .map_err(|e| SyncError::transport(url, e))?;

            if response.status != 429 {
                return Ok(response);
            }

            let wait = rate_limit_wait(&response, self.clock.now(), self.margin);
            tracing::warn!(
                url = %url,
                wait_secs = wait.as_secs_f64(),
                "rate limited, waiting for the request budget to reset"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = self.clock.sleep(wait) => {}
            }
        }
    }

    /// Like [`Fetcher::send`], but anything outside 2xx is a transport error.
    pub async fn fetch(&self, url: &str) -> Result<RawResponse> {
        let response = self.send(url).await?;
        if !response.is_success() {
            return Err(SyncError::transport(
                url,
                format!("unexpected status {}", response.status),
            ));
        }
        Ok(response)
    }

    /// Downloads a media file. Media lives on a CDN, so no credentials are sent.
    pub async fn download(&self, url: &str) -> Result<RawResponse> {
        let response = self
            .client
            .get(url, None)
            .await
            .map_err(|e| SyncError::transport(url, e))?;

        if response.status != 200 {
            return Err(SyncError::MediaFetch {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }
}

/// How long to back off after a 429: until the disclosed reset instant
/// (never negative) plus `margin`.
pub fn rate_limit_wait(response: &RawResponse, now: DateTime<Utc>, margin: Duration) -> Duration {
    let reset = response
        .header(RATE_LIMIT_RESET_HEADER)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite())
        .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64));

    let Some(reset) = reset else {
        tracing::warn!("429 without a usable reset header, backing off for a full window");
        return FALLBACK_RATE_LIMIT_WINDOW + margin;
    };

    (reset - now).to_std().unwrap_or(Duration::ZERO) + margin
}
