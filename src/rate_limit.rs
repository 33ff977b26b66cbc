use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::gateway_util::AppStateData;

/// Static per-IP rate limit using integer token buckets.
///
/// One mutex guards the whole bucket map: the common path (a known IP set
/// below the eviction threshold) is a single map lookup, and the occasional
/// O(n) sweep stays amortized behind the threshold gate.
pub struct Limiter {
    requests: i64,
    per: Duration,
    evict_threshold: usize,
    max_stale: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: i64,
    last_fill: Instant,
}

impl Limiter {
    /// `Limiter::new(60, Duration::from_secs(60), ...)` = 60 req/min per IP.
    pub fn new(
        requests: i64,
        per: Duration,
        evict_threshold: usize,
        max_stale: Duration,
    ) -> Self {
        Self {
            requests,
            per,
            evict_threshold,
            max_stale,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Reports whether the request from `ip` should be admitted.
    pub fn allow(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.lock_buckets();

        // Opportunistic eviction of stale buckets to bound memory.
        if buckets.len() > self.evict_threshold {
            let max_stale = self.max_stale;
            buckets.retain(|_, bucket| now.duration_since(bucket.last_fill) <= max_stale);
        }

        let Some(bucket) = buckets.get_mut(ip) else {
            // The current request is the admitted one.
            buckets.insert(
                ip.to_string(),
                Bucket {
                    tokens: self.requests - 1,
                    last_fill: now,
                },
            );
            return true;
        };

        // Refill based on elapsed time; one token per `per / requests`,
        // floored to 1 ns so absurd configurations stay defined.
        let interval_ns = (self.per.as_nanos() as i64 / self.requests).max(1);
        let refill = now.duration_since(bucket.last_fill).as_nanos() as i64 / interval_ns;
        if refill > 0 {
            bucket.tokens = bucket.tokens.saturating_add(refill).min(self.requests);
            bucket.last_fill = now;
        }

        if bucket.tokens <= 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }

    pub fn bucket_count(&self) -> usize {
        self.lock_buckets().len()
    }

    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Middleware that rate limits by client IP, answering 429 with the
/// configured `Retry-After` (seconds) on denial.
pub async fn enforce(
    State(state): State<AppStateData>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer);

    if !state.limiter.allow(&ip) {
        let retry_after_secs = state.config.inbound_retry_after_secs;
        state.metrics.record_inbound_429(retry_after_secs);
        tracing::debug!(ip = %ip, "inbound rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            Json(json!({"error": "rate limited"})),
        )
            .into_response();
    }

    next.run(request).await
}

/// The first `X-Forwarded-For` entry when present (we trust the proxy header;
/// deployments strip it at an untrusted edge), else the peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}
