//! Shared HTTP request path for the platform adapters
//!
//! Every JSON API call goes through [`Transport`], which:
//!
//! - counts requests so the engine can report API usage per repository
//! - sleeps until the quota reset when the remaining-quota header drops below
//!   [`RATE_LIMIT_THRESHOLD`], even on successful responses
//! - maps non-success statuses onto [`MirrorError`] variants
//! - retries transient failures with exponential backoff and jitter
//! - streams downloads to disk, deleting and restarting partial files on failure

use rand::Rng;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Proxy, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{MirrorError, Result};

/// Remaining-quota low-water mark that triggers a proactive sleep
pub const RATE_LIMIT_THRESHOLD: u64 = 10;

/// Attempts per request, first try included
pub const MAX_ATTEMPTS: u32 = 3;

/// Statuses treated as transient server failures
pub const RETRY_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

const API_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const CHUNK_SIZE: usize = 8192;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("release-mirror/", env!("CARGO_PKG_VERSION"));

/// Platform-specific header names and status semantics
#[derive(Debug, Clone, Copy)]
pub struct ApiProfile {
    pub remaining_header: &'static str,
    pub reset_header: &'static str,
    /// Treat 401 as access denied instead of a generic API error
    pub unauthorized_is_denied: bool,
}

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `base * (2^n + jitter)` with jitter in `[0, 1)`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff before re-issuing after failed attempt `attempt` (counted from 0)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.base_delay
            .mul_f64(2f64.powi(attempt as i32) + jitter)
    }
}

/// How long to wait after a response reporting `remaining` quota that resets at
/// `reset_at` (unix seconds), given the current time `now`
pub fn throttle_delay(remaining: Option<u64>, reset_at: Option<i64>, now: i64) -> Option<Duration> {
    let remaining = remaining?;
    let reset_at = reset_at?;

    if remaining >= RATE_LIMIT_THRESHOLD {
        return None;
    }

    let wait = (reset_at - now).max(0) as u64 + 1;
    Some(Duration::from_secs(wait))
}

/// Seconds to sleep before retrying after a rate-limit rejection
pub fn reset_wait(reset_at: i64) -> Duration {
    let now = chrono::Utc::now().timestamp();
    Duration::from_secs((reset_at - now).max(0) as u64 + 1)
}

/// Extract the `rel="last"` page number from a `Link` header
pub fn parse_last_page(link: &str) -> Option<u64> {
    static LAST: OnceLock<Regex> = OnceLock::new();
    let re = LAST.get_or_init(|| {
        Regex::new(r#"[?&]page=(\d+)[^>]*>;\s*rel="last""#).expect("static link pattern")
    });
    re.captures(link).and_then(|caps| caps[1].parse().ok())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn proxy_url(proxy: &str) -> String {
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{}", proxy)
    }
}

/// Build an `Authorization: Bearer` style header value
pub fn sensitive_header(value: &str) -> Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| MirrorError::config("token contains characters not allowed in a header"))?;
    header.set_sensitive(true);
    Ok(header)
}

/// Insert a bearer token into a header map
pub fn insert_bearer(headers: &mut HeaderMap, token: &str) -> Result<()> {
    headers.insert(AUTHORIZATION, sensitive_header(&format!("Bearer {}", token))?);
    Ok(())
}

/// Authenticated HTTP client shared by one platform adapter
pub struct Transport {
    client: Client,
    profile: ApiProfile,
    retry: RetryPolicy,
    /// Sent with API calls only, never with asset downloads
    api_headers: HeaderMap,
    request_count: AtomicU64,
}

impl Transport {
    /// Create a transport injecting `default_headers` into every request
    pub fn new(
        profile: ApiProfile,
        proxy: Option<&str>,
        default_headers: HeaderMap,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(default_headers);

        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy_url(proxy))
                .map_err(|e| MirrorError::config(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| MirrorError::config(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            profile,
            retry,
            api_headers: HeaderMap::new(),
            request_count: AtomicU64::new(0),
        })
    }

    /// Attach headers to API calls without leaking them to download hosts
    pub fn with_api_headers(mut self, headers: HeaderMap) -> Self {
        self.api_headers = headers;
        self
    }

    /// API requests issued so far
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// GET a JSON document, without retries
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.send(url).await?;
        decode_json(response).await
    }

    /// GET a JSON document, retrying transient failures
    pub async fn get_json_with_retry<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.with_retry(url, move || async move { self.get_json(url).await })
            .await
    }

    /// Total number of releases behind a listing endpoint, using one request
    pub async fn count_releases(&self, releases_url: &str) -> Result<u64> {
        let url = format!("{}?per_page=1", releases_url);
        let response = self.send(&url).await?;

        if let Some(total) = header_str(response.headers(), "x-total").and_then(|v| v.parse().ok())
        {
            return Ok(total);
        }

        if let Some(last) = header_str(response.headers(), "link").and_then(parse_last_page) {
            return Ok(last);
        }

        let page: Vec<serde_json::Value> = decode_json(response).await?;
        Ok(page.len() as u64)
    }

    /// Issue a lightweight request and return its response headers whatever the status
    pub async fn probe_headers(&self, url: &str) -> Result<HeaderMap> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .headers(self.api_headers.clone())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        Ok(response.headers().clone())
    }

    /// Stream `url` into `dest`, restarting from scratch on transient failures
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_size: u64,
        headers: &HeaderMap,
    ) -> Result<()> {
        self.with_retry(url, move || async move {
            let outcome = self.download_once(url, dest, expected_size, headers).await;
            if outcome.is_err() {
                remove_partial(dest).await;
            }
            outcome
        })
        .await
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        expected_size: u64,
        headers: &HeaderMap,
    ) -> Result<()> {
        debug!("GET {} -> {}", url, dest.display());

        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        let mut response = self.check_status(response).await?;

        let total = response.content_length().unwrap_or(0).max(expected_size);
        let file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| MirrorError::io(dest, e))?;
        let mut writer = tokio::io::BufWriter::with_capacity(CHUNK_SIZE, file);

        let mut downloaded: u64 = 0;
        let mut last_logged_pct: i64 = -10;

        while let Some(chunk) = response.chunk().await? {
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| MirrorError::io(dest, e))?;
            downloaded += chunk.len() as u64;

            if total > 0 {
                let pct = (downloaded.saturating_mul(100) / total) as i64;
                if pct >= last_logged_pct + 10 {
                    debug!("downloading {}: {}%", dest.display(), pct);
                    last_logged_pct = pct;
                }
            }
        }

        writer.flush().await.map_err(|e| MirrorError::io(dest, e))?;
        Ok(())
    }

    async fn send(&self, url: &str) -> Result<Response> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .headers(self.api_headers.clone())
            .timeout(API_TIMEOUT)
            .send()
            .await?;
        self.check_status(response).await
    }

    /// Throttle on low quota, then map non-success statuses to errors
    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        let headers = response.headers();

        let remaining = header_str(headers, self.profile.remaining_header);
        let reset_at = header_str(headers, self.profile.reset_header).and_then(|v| v.parse::<i64>().ok());

        if let Some(remaining) = remaining {
            debug!("rate limit remaining: {}", remaining);
        }

        let rejected_for_quota = match (status, reset_at) {
            (StatusCode::FORBIDDEN, Some(_)) => remaining == Some("0"),
            (StatusCode::TOO_MANY_REQUESTS, Some(_)) => true,
            _ => false,
        };

        // A rejection means no quota is left, whatever the remaining header says
        let remaining_count = if rejected_for_quota {
            Some(0)
        } else {
            remaining.and_then(|v| v.parse::<u64>().ok())
        };

        // No request leaves this transport before the reset once quota runs low
        let now = chrono::Utc::now().timestamp();
        if let Some(wait) = throttle_delay(remaining_count, reset_at, now) {
            warn!(
                "rate limit low ({}), waiting {}s...",
                remaining_count.unwrap_or_default(),
                wait.as_secs()
            );
            tokio::time::sleep(wait).await;
        }

        if rejected_for_quota {
            return Err(MirrorError::RateLimited {
                reset_at: reset_at.unwrap_or_default(),
            });
        }

        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        let url = response.url().to_string();

        if RETRY_STATUS_CODES.contains(&code) {
            return Err(MirrorError::Transient(format!("server error {}", code)));
        }

        match status {
            StatusCode::NOT_FOUND => Err(MirrorError::NotFound(url)),
            StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(MirrorError::AccessDenied(body))
            }
            StatusCode::UNAUTHORIZED if self.profile.unauthorized_is_denied => {
                Err(MirrorError::AccessDenied("authentication required".to_string()))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(MirrorError::Api { status: code, body })
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "retry {}/{} for {} in {:.1}s: {}",
                        attempt + 1,
                        self.retry.max_attempts,
                        what,
                        delay.as_secs_f64(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().to_string();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| MirrorError::Decode {
        url,
        message: e.to_string(),
    })
}

async fn remove_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => debug!("removed partial download {}", dest.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove partial download {}: {}", dest.display(), e),
    }
}
