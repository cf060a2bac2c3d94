use crate::types::{DigestError, FetchConfig, FetchOutcome, FetchedPage, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::{Client, Response, StatusCode};
use std::collections::HashSet;
use std::error::Error as _;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

/// Closed set of connection-level failure kinds, derived once at the
/// reqwest boundary so the retry decision itself stays pure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    ConnectionReset,
    BrokenPipe,
    ConnectionRefused,
    DnsFailure,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// Pure retry decision over the closed error-kind set. DNS failures and
/// refused connections are definitive for the origin; everything else is
/// worth retrying.
pub fn retry_decision(kind: FetchErrorKind) -> FailureClass {
    match kind {
        FetchErrorKind::ConnectionRefused | FetchErrorKind::DnsFailure => FailureClass::Permanent,
        FetchErrorKind::Timeout
        | FetchErrorKind::ConnectionReset
        | FetchErrorKind::BrokenPipe
        | FetchErrorKind::Other => FailureClass::Transient,
    }
}

/// Map a reqwest error to a [`FetchErrorKind`] by walking its cause chain
/// for recognizable io-level markers.
pub fn error_kind(err: &reqwest::Error) -> FetchErrorKind {
    if err.is_timeout() {
        return FetchErrorKind::Timeout;
    }
    let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return FetchErrorKind::ConnectionRefused,
                std::io::ErrorKind::ConnectionReset => return FetchErrorKind::ConnectionReset,
                std::io::ErrorKind::BrokenPipe => return FetchErrorKind::BrokenPipe,
                _ => {}
            }
        }
        // DNS resolution errors surface from the resolver without a stable
        // io::ErrorKind; the message marker is the only portable signal.
        let text = cause.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return FetchErrorKind::DnsFailure;
        }
        source = cause.source();
    }
    if err.is_connect() {
        return FetchErrorKind::ConnectionRefused;
    }
    FetchErrorKind::Other
}

/// The scheme+host portion of a URL, lowercased. Unit of circuit-breaking.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(format!("{}://{}", parsed.scheme(), host).to_lowercase())
}

/// HTTP client with bounded retry/backoff and per-origin failure isolation.
///
/// The failed-origin set lives for one pipeline run and is deliberately not
/// persisted; a blacklisted origin is retried fresh on the next run.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    failed_origins: RwLock<HashSet<String>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            failed_origins: RwLock::new(HashSet::new()),
        })
    }

    /// The deterministic retry schedule: 1s, 2s, ... (base 2, no jitter).
    fn retry_schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.backoff_base_secs),
            initial_interval: Duration::from_secs(self.config.backoff_base_secs),
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Waits inserted between attempts for a budget of `attempts` tries.
    /// Exposed for tests; a 3-attempt budget yields exactly [1s, 2s].
    pub fn backoff_delays(&self, attempts: u32) -> Vec<Duration> {
        let mut schedule = self.retry_schedule();
        (1..attempts)
            .filter_map(|_| schedule.next_backoff())
            .collect()
    }

    pub async fn is_origin_failed(&self, url: &str) -> bool {
        match origin_of(url) {
            Some(origin) => self.failed_origins.read().await.contains(&origin),
            None => false,
        }
    }

    pub async fn mark_origin_failed(&self, url: &str) {
        if let Some(origin) = origin_of(url) {
            let inserted = self.failed_origins.write().await.insert(origin.clone());
            if inserted {
                warn!("Origin {} blacklisted for the rest of this run", origin);
            }
        }
    }

    /// GET with conditional headers, retry/backoff, and failure isolation.
    ///
    /// Not retried: 4xx other than 429, and connection failures classified
    /// as permanent (DNS, connection refused). Permanent classification and
    /// retry exhaustion both blacklist the origin for the rest of the run.
    pub async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchOutcome> {
        if self.is_origin_failed(url).await {
            info!("Skipping {} (origin previously failed)", url);
            return Err(DigestError::OriginBlacklisted(
                origin_of(url).unwrap_or_else(|| url.to_string()),
            ));
        }

        let mut schedule = self.retry_schedule();
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retries {
            debug!("GET {} (attempt {}/{})", url, attempt, self.config.max_retries);
            match self.send(url, etag, last_modified).await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::NOT_MODIFIED {
                        return Ok(FetchOutcome::NotModified);
                    }

                    // 4xx (except 429) are definitive for this URL; no retry,
                    // but a single bad path says nothing about the origin.
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        warn!("{} returned HTTP {}", url, status.as_u16());
                        return Err(DigestError::HttpStatus {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }

                    if status.is_success() {
                        return self.read_page(url, response).await;
                    }

                    // 5xx and 429 are retryable.
                    last_error = format!("HTTP {}", status.as_u16());
                }
                Err(e) => {
                    let kind = error_kind(&e);
                    if retry_decision(kind) == FailureClass::Permanent {
                        warn!(
                            "{} failed (non-retryable: {:?}), blacklisting origin",
                            url, kind
                        );
                        self.mark_origin_failed(url).await;
                        return Err(DigestError::Http(e));
                    }
                    last_error = e.to_string();
                }
            }

            if attempt < self.config.max_retries {
                if let Some(wait) = schedule.next_backoff() {
                    warn!(
                        "Attempt {}/{} for {} failed: {} (retry in {:?})",
                        attempt, self.config.max_retries, url, last_error, wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        // Conservative: exhausting the budget on transient failures also
        // blacklists the origin for the rest of the run.
        error!(
            "All {} attempts failed for {}: {}",
            self.config.max_retries, url, last_error
        );
        self.mark_origin_failed(url).await;
        Err(DigestError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.config.max_retries,
            last: last_error,
        })
    }

    async fn send(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> std::result::Result<Response, reqwest::Error> {
        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header("If-Modified-Since", last_modified);
        }
        request.send().await
    }

    async fn read_page(&self, url: &str, response: Response) -> Result<FetchOutcome> {
        let status = response.status().as_u16();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let etag = header("etag");
        let last_modified = header("last-modified");
        let content_type = header("content-type");
        let body = response.text().await.map_err(|e| {
            warn!("Failed to read body from {}: {}", url, e);
            DigestError::Http(e)
        })?;
        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(FetchOutcome::Success(FetchedPage {
            status,
            body,
            content_type,
            etag,
            last_modified,
        }))
    }
}
