use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::http::StatusCode;
use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::time::Instant;
use url::Url;

use crate::config::Config;
use crate::error::{Error, ErrorDetails};
use crate::metrics::Metrics;

/// Header carrying the Atlas API secret.
const ATLAS_SECRET_HEADER: &str = "Abios-Secret";

/// How much of an upstream error body is echoed into error messages.
const ERROR_BODY_LIMIT: usize = 256;

/// Rate limit info parsed from Atlas response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitSnapshot {
    pub limit: Option<u64>,
    pub burst: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_ms: Option<u64>,
}

impl RateLimitSnapshot {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit: header_u64(headers, "x-ratelimit-limit"),
            burst: header_u64(headers, "x-ratelimit-burst"),
            remaining: header_u64(headers, "x-ratelimit-remaining"),
            reset_ms: header_u64(headers, "x-ratelimit-reset"),
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

/// Atlas API client with reactive outbound rate limiting: it throttles only
/// after Atlas answers 429, honoring the `Retry-After` it was given.
///
/// The backoff gate is shared across all endpoints of this client; a 429 on
/// `/series` delays the next `/rosters` call just the same.
pub struct AtlasClient {
    base_url: Url,
    secret: SecretString,
    http_client: reqwest::Client,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    // Don't send before this instant. None = no active backoff.
    backoff_until: Mutex<Option<Instant>>,
}

impl AtlasClient {
    pub fn new(
        secret: SecretString,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, Error> {
        Self::with_base_url(config.atlas_base_url.clone(), secret, config, metrics)
    }

    /// Create a client against a custom base URL (tests, proxies).
    pub fn with_base_url(
        mut base_url: Url,
        secret: SecretString,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, Error> {
        // `Url::join` treats a path without a trailing slash as a file and
        // would drop its last segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http_client = reqwest::Client::builder()
            .timeout(config.atlas_client_timeout)
            .build()
            .map_err(|e| {
                Error::new(ErrorDetails::AppState {
                    message: format!("Failed to build Atlas HTTP client: {e}"),
                })
            })?;
        Ok(Self {
            base_url,
            secret,
            http_client,
            config,
            metrics,
            backoff_until: Mutex::new(None),
        })
    }

    /// Perform a GET against Atlas and return the body plus rate limit info.
    ///
    /// On 429 this sets the outbound backoff gate and returns
    /// [`ErrorDetails::AtlasRateLimited`]; the request is never retried here.
    pub async fn get(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(Bytes, RateLimitSnapshot), Error> {
        self.wait_outbound().await;

        let url = self.endpoint_url(path)?;
        let response = self
            .http_client
            .get(url)
            .query(params)
            .header(ATLAS_SECRET_HEADER, self.secret.expose_secret())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::AtlasTransport {
                    message: e.to_string(),
                })
            })?;

        let status = response.status();
        let snapshot = RateLimitSnapshot::from_headers(response.headers());
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(|e| {
            Error::new(ErrorDetails::AtlasTransport {
                message: e.to_string(),
            })
        })?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = parse_retry_after(retry_after.as_deref())
                .max(self.config.atlas_outbound_min_backoff.as_millis() as u64);
            self.set_backoff(retry_after_ms);
            self.metrics.record_atlas_429(retry_after_ms);
            return Err(Error::new(ErrorDetails::AtlasRateLimited {
                retry_after_ms,
            }));
        }

        if !status.is_success() {
            return Err(Error::new(ErrorDetails::AtlasHttp {
                status,
                message: truncate_body(&body),
            }));
        }

        Ok((body, snapshot))
    }

    /// Wait until any active backoff (from a 429) has elapsed. Dropping the
    /// caller's future cancels the wait without sending anything.
    async fn wait_outbound(&self) {
        let until = *self
            .backoff_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(until) = until {
            if until > Instant::now() {
                tokio::time::sleep_until(until).await;
            }
        }
    }

    fn set_backoff(&self, retry_after_ms: u64) {
        let until = Instant::now() + Duration::from_millis(retry_after_ms);
        *self
            .backoff_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(until);
    }

    fn endpoint_url(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| {
                Error::new(ErrorDetails::InvalidBaseUrl {
                    message: format!("Failed to build Atlas URL for `{path}`: {e}"),
                })
            })
    }

    /// Fetch every page of a paginated endpoint and merge the results into
    /// one JSON array.
    ///
    /// Atlas has no last-page marker: the only terminator is a page with
    /// fewer than `take` items (including zero), so a full page always
    /// triggers one more request.
    async fn get_all_pages(
        &self,
        path: &str,
        base_params: &BTreeMap<String, String>,
    ) -> Result<(Bytes, RateLimitSnapshot), Error> {
        let page_size = self.config.page_size;
        let mut all: Vec<Value> = Vec::new();
        let mut skip = 0usize;
        loop {
            let mut params = base_params.clone();
            params.insert("skip".to_string(), skip.to_string());
            params.insert("take".to_string(), page_size.to_string());

            let (body, snapshot) = self.get(path, &params).await?;
            let page: Vec<Value> = serde_json::from_slice(&body).map_err(|e| {
                Error::new(ErrorDetails::AtlasDecode {
                    message: format!("invalid JSON array from {path}: {e}"),
                })
            })?;
            tracing::debug!(path, skip, items = page.len(), "pagination page");

            let short_page = page.len() < page_size;
            all.extend(page);
            if short_page {
                let merged = serde_json::to_vec(&all).map_err(|e| {
                    Error::new(ErrorDetails::Serialization {
                        message: format!("Failed to merge pages from {path}: {e}"),
                    })
                })?;
                return Ok((Bytes::from(merged), snapshot));
            }
            skip += page_size;
        }
    }

    pub async fn get_series_all(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<(Bytes, RateLimitSnapshot), Error> {
        self.get_all_pages("/series", params).await
    }

    pub async fn get_rosters_all(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<(Bytes, RateLimitSnapshot), Error> {
        self.get_all_pages("/rosters", params).await
    }

    pub async fn get_players_all(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<(Bytes, RateLimitSnapshot), Error> {
        self.get_all_pages("/players", params).await
    }

    pub async fn get_teams_all(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<(Bytes, RateLimitSnapshot), Error> {
        self.get_all_pages("/teams", params).await
    }
}

/// Format `filter=id<={ids}` for the Atlas API, e.g. `id<={1,2,3}`.
/// An empty slice yields the empty string; callers treat that as "do not fetch".
pub fn filter_id_in(ids: &[u64]) -> String {
    if ids.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(8 + ids.len() * 7);
    out.push_str("id<={");
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&id.to_string());
    }
    out.push('}');
    out
}

/// Atlas sends `Retry-After` as integer milliseconds. Absent or garbled
/// headers fall back to 1000 ms; the configured minimum backoff is applied
/// as a floor on top of this by the caller.
fn parse_retry_after(value: Option<&str>) -> u64 {
    value.and_then(|s| s.parse::<u64>().ok()).unwrap_or(1000)
}

fn truncate_body(body: &Bytes) -> String {
    let text = String::from_utf8_lossy(body);
    let mut text = text.into_owned();
    if text.len() > ERROR_BODY_LIMIT {
        let mut end = ERROR_BODY_LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
