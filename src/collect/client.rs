//! Rate-limit-aware platform API client.
//!
//! Issues authenticated JSON GETs against the code-hosting API. Rate limits
//! (429, or 403 carrying the known rate-limit phrases) are retried with
//! bounded exponential backoff honoring `Retry-After`; transient transport
//! failures and 5xx responses use a separate, shorter retry budget. 404 is
//! surfaced as `Ok(None)` so callers can record a negative cache entry.

use crate::Result;
use crate::error::DigestError;
use chrono::{DateTime, Utc};
use core::time::Duration;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

const LOG_TARGET: &str = "    client";

/// Default base URL of the platform API.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Base URL of the platform's web UI, used when synthesizing item links.
pub const GITHUB_WEB_BASE: &str = "https://github.com";

/// Page size used for paginated endpoints.
pub const PAGE_SIZE: usize = 100;

/// Maximum rate-limit retries on top of the original request.
const MAX_RATE_LIMIT_RETRIES: u32 = 4;
const RATE_LIMIT_BASE_WAIT: Duration = Duration::from_secs(2);
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

/// Transport-level tries (including the original request).
const MAX_TRANSPORT_TRIES: u32 = 3;
const TRANSPORT_BASE_WAIT: Duration = Duration::from_secs(2);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Body phrases that mark a 403 as a rate limit rather than a permission error.
const RATE_LIMIT_PHRASES: &[&str] = &["secondary rate", "rate limit exceeded", "abuse detection"];

/// Rate limit telemetry from response headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitInfo {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_after: Option<u64>,
}

impl RateLimitInfo {
    /// Extract rate limit information from API response headers.
    fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| headers.get(name).and_then(|h| h.to_str().ok()).and_then(|s| s.parse::<u64>().ok());

        Self {
            remaining: number("x-ratelimit-remaining"),
            limit: number("x-ratelimit-limit"),
            reset_at: headers
                .get("x-ratelimit-reset")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            retry_after: headers.get(RETRY_AFTER).and_then(|h| h.to_str().ok()).and_then(|s| s.parse::<u64>().ok()),
        }
    }

    /// One-line description attached to throttling warnings.
    fn describe(&self) -> String {
        format!(
            "remaining={} limit={} reset_at={} retry_after={}",
            self.remaining.map_or_else(|| "?".to_string(), |v| v.to_string()),
            self.limit.map_or_else(|| "?".to_string(), |v| v.to_string()),
            self.reset_at.map_or_else(|| "?".to_string(), |t| t.to_rfc3339()),
            self.retry_after.map_or_else(|| "?".to_string(), |v| format!("{v}s")),
        )
    }
}

/// Classified outcome of a single exchange (after transport retries).
enum Outcome {
    Success(Value),
    NotFound,
    RateLimited(RateLimitInfo),
}

/// Platform API client. Cheap to clone; the inner connection pool and the
/// auth-failure memo are shared across clones.
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
    token_present: bool,
    /// Paths that came back 401/403 this run; skipped without further
    /// requests so a bad token can't cause a retry storm.
    auth_failed: Arc<Mutex<HashMap<String, u16>>>,
}

impl GithubClient {
    /// Create a new client with an optional authentication token and base URL.
    pub fn new(token: Option<&str>, base_url: impl Into<String>) -> Result<Self> {
        use reqwest::header::{AUTHORIZATION, HeaderValue};

        let mut client_builder = reqwest::Client::builder()
            .user_agent("tech-digest")
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);

        if let Some(t) = token {
            let mut auth_val = HeaderValue::from_str(&format!("token {t}")).map_err(|e| DigestError::Config {
                context: "client".into(),
                detail: format!("invalid platform token: {e}"),
            })?;
            auth_val.set_sensitive(true);

            let mut headers = HeaderMap::new();
            let _ = headers.insert(AUTHORIZATION, auth_val);

            client_builder = client_builder.default_headers(headers);
        }

        let client = client_builder.build().map_err(|e| DigestError::Config {
            context: "client".into(),
            detail: format!("unable to build HTTP client: {e}"),
        })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token_present: token.is_some(),
            auth_failed: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Whether an authentication token is attached. Consumers adjust page
    /// sizes, pagination, and reference limits based on this.
    #[must_use]
    pub const fn token_present(&self) -> bool {
        self.token_present
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a JSON document. Returns `Ok(None)` on 404 so the caller can record
    /// a negative cache entry; retries rate limits and transport failures
    /// within their respective budgets.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Option<Value>> {
        if let Some(status) = self.auth_failed.lock().expect("lock not poisoned").get(path).copied() {
            return Err(DigestError::Auth {
                status,
                url: format!("{}{}", self.base_url, path),
            });
        }

        let url = self.build_url(path, query)?;
        let mut retry: u32 = 0;

        loop {
            match self.exchange(&url).await.map_err(|e| self.record_auth_failure(path, e))? {
                Outcome::Success(value) => return Ok(Some(value)),
                Outcome::NotFound => {
                    log::info!(target: LOG_TARGET, "HTTP 404 for {url}, recording negative result");
                    return Ok(None);
                }
                Outcome::RateLimited(info) => {
                    retry += 1;
                    if retry > MAX_RATE_LIMIT_RETRIES {
                        log::warn!(target: LOG_TARGET, "Rate limit retry budget exhausted for {url} ({})", info.describe());
                        return Err(DigestError::RateLimited {
                            url: url.to_string(),
                            remaining: info.remaining,
                            reset_in_secs: info.reset_at.map(|t| (t - Utc::now()).num_seconds()),
                        });
                    }

                    let wait = rate_limit_wait(&info, retry);
                    log::warn!(
                        target: LOG_TARGET,
                        "Rate limited for {url}, waiting {:.0}s before retry {retry}/{MAX_RATE_LIMIT_RETRIES} ({})",
                        wait.as_secs_f64(),
                        info.describe()
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// GET all pages of a list endpoint, requesting `per_page=100` and
    /// advancing until a page comes back short or empty.
    pub async fn get_paginated(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        let mut page: u32 = 1;

        loop {
            let mut q: Vec<(&str, String)> = query.to_vec();
            q.push(("per_page", PAGE_SIZE.to_string()));
            q.push(("page", page.to_string()));

            let Some(value) = self.get_json(path, &q).await? else {
                break;
            };
            let batch = value.as_array().cloned().unwrap_or_default();
            let fetched = batch.len();
            rows.extend(batch);

            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(rows)
    }

    /// Non-paginating shortcut: fetch a single page of at most `per_page`
    /// rows. Used on token-less runs to protect the rate budget.
    pub async fn get_capped(&self, path: &str, query: &[(&str, String)], per_page: usize) -> Result<Vec<Value>> {
        let mut q: Vec<(&str, String)> = query.to_vec();
        q.push(("per_page", per_page.to_string()));

        let Some(value) = self.get_json(path, &q).await? else {
            return Ok(Vec::new());
        };
        Ok(value.as_array().cloned().unwrap_or_default())
    }

    /// Remember auth failures so the endpoint is skipped for the rest of the run.
    fn record_auth_failure(&self, path: &str, error: DigestError) -> DigestError {
        if let DigestError::Auth { status, .. } = &error {
            let _ = self.auth_failed.lock().expect("lock not poisoned").insert(path.to_string(), *status);
        }
        error
    }

    fn build_url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path)).map_err(|e| DigestError::Parse {
            url: format!("{}{}", self.base_url, path),
            detail: e.to_string(),
        })?;

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                let _ = pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// One logical exchange: sends the request, retrying transport failures
    /// and 5xx within the transport budget, then classifies the final response.
    async fn exchange(&self, url: &Url) -> Result<Outcome> {
        let mut tries: u32 = 0;

        loop {
            tries += 1;

            let response = match self.client.get(url.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    if tries < MAX_TRANSPORT_TRIES {
                        let wait = transport_wait(tries);
                        log::debug!(target: LOG_TARGET, "Transport failure for {url} ({e}), retrying in {:.0}s", wait.as_secs_f64());
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return Err(DigestError::Transport {
                        url: url.to_string(),
                        source: e,
                    });
                }
            };

            if response.status().is_server_error() {
                let status = response.status().as_u16();
                if tries < MAX_TRANSPORT_TRIES {
                    let wait = transport_wait(tries);
                    log::debug!(target: LOG_TARGET, "HTTP {status} for {url}, retrying in {:.0}s", wait.as_secs_f64());
                    tokio::time::sleep(wait).await;
                    continue;
                }
                return Err(DigestError::Http {
                    status,
                    url: url.to_string(),
                });
            }

            return self.classify(response, url).await;
        }
    }

    /// Classify a non-5xx response.
    async fn classify(&self, response: reqwest::Response, url: &Url) -> Result<Outcome> {
        let status = response.status().as_u16();
        let info = RateLimitInfo::from_headers(response.headers());
        log::debug!(target: LOG_TARGET, "HTTP {status} for {url}");

        match status {
            200..=299 => {
                let body = response.text().await.map_err(|e| DigestError::Transport {
                    url: url.to_string(),
                    source: e,
                })?;
                let value = serde_json::from_str(&body).map_err(|e| {
                    log::warn!(target: LOG_TARGET, "Unparseable response from {url}: {e} (body: {})", crate::collect::text::one_line(&body, 120));
                    DigestError::parse(url.to_string(), &e)
                })?;
                Ok(Outcome::Success(value))
            }
            404 => Ok(Outcome::NotFound),
            429 => Ok(Outcome::RateLimited(info)),
            403 => {
                let body = response.text().await.unwrap_or_default();
                let lowered = body.to_lowercase();
                if info.retry_after.is_some() || RATE_LIMIT_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
                    Ok(Outcome::RateLimited(info))
                } else {
                    log::warn!(target: LOG_TARGET, "HTTP 403 (not rate-limited, {}) for {url}", info.describe());
                    Err(DigestError::Auth {
                        status,
                        url: url.to_string(),
                    })
                }
            }
            401 => {
                log::warn!(target: LOG_TARGET, "HTTP 401 for {url}; skipping endpoint for this run");
                Err(DigestError::Auth {
                    status,
                    url: url.to_string(),
                })
            }
            _ => Err(DigestError::Http {
                status,
                url: url.to_string(),
            }),
        }
    }
}

/// Backoff for rate-limited retries: `Retry-After` when the server provided a
/// positive value, otherwise `min(base · 2^(retry-1), max)`.
fn rate_limit_wait(info: &RateLimitInfo, retry: u32) -> Duration {
    if let Some(secs) = info.retry_after.filter(|&s| s > 0) {
        return Duration::from_secs(secs);
    }

    let exponential = RATE_LIMIT_BASE_WAIT.saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)));
    exponential.min(MAX_RATE_LIMIT_WAIT)
}

/// Backoff for transport retries: `base · 2^(try-1)`.
fn transport_wait(tries: u32) -> Duration {
    TRANSPORT_BASE_WAIT.saturating_mul(2u32.saturating_pow(tries.saturating_sub(1)))
}
