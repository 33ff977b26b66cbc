use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;
use serde_json::{json, Value};

use crate::gateway_util::AppStateData;

/// Two minutes of history at one sample per second.
const HISTORY_SIZE: usize = 120;

/// Paths excluded from traffic counters so the graph reflects only API traffic.
const EXCLUDED_PATHS: [&str; 2] = ["/stats", "/monitor"];

/// Monotonic traffic counters plus a rolling window of per-second deltas.
///
/// Counters are lock-free; the history buffer is the only part behind a
/// mutex, touched once per second by the sampler and on `/stats` reads.
pub struct Metrics {
    requests_total: AtomicU64,
    requests_ok: AtomicU64,
    inbound_429: AtomicU64,
    atlas_429: AtomicU64,
    last_inbound_retry_after_s: AtomicU64,
    last_atlas_retry_after_ms: AtomicU64,
    history: Mutex<History>,
}

#[derive(Clone, Copy, Default, Serialize)]
struct Sample {
    t: u64,
    req: u64,
    ok: u64,
    inbound_429: u64,
    atlas_429: u64,
    atlas_retry_after_ms: u64,
    inbound_retry_after_s: u64,
}

struct History {
    samples: [Sample; HISTORY_SIZE],
    idx: usize,
    last_total: u64,
    last_ok: u64,
    last_inbound: u64,
    last_atlas: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_ok: AtomicU64::new(0),
            inbound_429: AtomicU64::new(0),
            atlas_429: AtomicU64::new(0),
            last_inbound_retry_after_s: AtomicU64::new(0),
            last_atlas_retry_after_ms: AtomicU64::new(0),
            history: Mutex::new(History {
                samples: [Sample::default(); HISTORY_SIZE],
                idx: 0,
                last_total: 0,
                last_ok: 0,
                last_inbound: 0,
                last_atlas: 0,
            }),
        }
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ok(&self) {
        self.requests_ok.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a limiter denial and the `Retry-After` (seconds) we answered with.
    pub fn record_inbound_429(&self, retry_after_secs: u64) {
        self.inbound_429.fetch_add(1, Ordering::Relaxed);
        self.last_inbound_retry_after_s
            .store(retry_after_secs, Ordering::Relaxed);
    }

    /// Record an Atlas 429 and the `Retry-After` (milliseconds) it told us.
    pub fn record_atlas_429(&self, retry_after_ms: u64) {
        self.atlas_429.fetch_add(1, Ordering::Relaxed);
        self.last_atlas_retry_after_ms
            .store(retry_after_ms, Ordering::Relaxed);
    }

    /// Spawn the 1 Hz background task that appends delta samples.
    pub fn spawn_sampler(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately; skip it so every sample
            // covers a full second.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.record_sample();
            }
        });
    }

    /// Append one delta sample to the circular history buffer.
    pub fn record_sample(&self) {
        let total = self.requests_total.load(Ordering::Relaxed);
        let ok = self.requests_ok.load(Ordering::Relaxed);
        let inbound = self.inbound_429.load(Ordering::Relaxed);
        let atlas = self.atlas_429.load(Ordering::Relaxed);

        let mut history = self.lock_history();
        let idx = history.idx;
        let sample = Sample {
            t: unix_now_secs(),
            req: total - history.last_total,
            ok: ok - history.last_ok,
            inbound_429: inbound - history.last_inbound,
            atlas_429: atlas - history.last_atlas,
            atlas_retry_after_ms: self.last_atlas_retry_after_ms.load(Ordering::Relaxed),
            inbound_retry_after_s: self.last_inbound_retry_after_s.load(Ordering::Relaxed),
        };
        history.samples[idx] = sample;
        history.idx = (idx + 1) % HISTORY_SIZE;
        history.last_total = total;
        history.last_ok = ok;
        history.last_inbound = inbound;
        history.last_atlas = atlas;
    }

    /// Current totals and recent history for graphing, oldest sample first.
    pub fn stats(&self) -> Value {
        let history = self.lock_history();
        let mut samples = Vec::with_capacity(HISTORY_SIZE);
        for i in 0..HISTORY_SIZE {
            let sample = history.samples[(history.idx + i) % HISTORY_SIZE];
            if sample.t != 0 {
                samples.push(sample);
            }
        }
        drop(history);

        json!({
            "total": {
                "requests": self.requests_total.load(Ordering::Relaxed),
                "ok": self.requests_ok.load(Ordering::Relaxed),
                "inbound_429": self.inbound_429.load(Ordering::Relaxed),
                "atlas_429": self.atlas_429.load(Ordering::Relaxed),
                "inbound_retry_after_s": self.last_inbound_retry_after_s.load(Ordering::Relaxed),
                "atlas_retry_after_ms": self.last_atlas_retry_after_ms.load(Ordering::Relaxed),
            },
            "history": samples,
        })
    }

    fn lock_history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Middleware counting total requests and OK responses.
pub async fn track_requests(
    State(state): State<AppStateData>,
    request: Request,
    next: Next,
) -> Response {
    let excluded = EXCLUDED_PATHS.contains(&request.uri().path());
    if !excluded {
        state.metrics.record_request();
    }
    let response = next.run(request).await;
    if !excluded && response.status() == StatusCode::OK {
        state.metrics.record_ok();
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_hold_deltas_not_totals() {
        let metrics = Metrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_ok();
        metrics.record_sample();

        metrics.record_request();
        metrics.record_sample();

        let stats = metrics.stats();
        let history = stats["history"].as_array().expect("history array");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["req"], 2);
        assert_eq!(history[0]["ok"], 1);
        assert_eq!(history[1]["req"], 1);
        assert_eq!(history[1]["ok"], 0);
        assert_eq!(stats["total"]["requests"], 3);
    }

    #[test]
    fn test_last_retry_after_slots() {
        let metrics = Metrics::new();
        metrics.record_inbound_429(60);
        metrics.record_atlas_429(1500);
        metrics.record_atlas_429(800);

        let stats = metrics.stats();
        assert_eq!(stats["total"]["inbound_429"], 1);
        assert_eq!(stats["total"]["atlas_429"], 2);
        assert_eq!(stats["total"]["inbound_retry_after_s"], 60);
        assert_eq!(stats["total"]["atlas_retry_after_ms"], 800);
    }

    #[test]
    fn test_history_wraps_at_capacity() {
        let metrics = Metrics::new();
        for _ in 0..HISTORY_SIZE + 5 {
            metrics.record_request();
            metrics.record_sample();
        }
        let stats = metrics.stats();
        let history = stats["history"].as_array().expect("history array");
        assert_eq!(history.len(), HISTORY_SIZE);
        // Every surviving sample is a one-request delta.
        assert!(history.iter().all(|s| s["req"] == 1));
    }
}
