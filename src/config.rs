use std::net::SocketAddr;
use std::time::Duration;

use lazy_static::lazy_static;
use url::Url;

lazy_static! {
    static ref ATLAS_DEFAULT_BASE_URL: Url = {
        #[allow(clippy::expect_used)]
        Url::parse("https://atlas.abiosgaming.com/v3/")
            .expect("Failed to parse ATLAS_DEFAULT_BASE_URL")
    };
}

/// Tuning knobs recognized by the gateway. Every field has a default and may
/// be overridden through `GAMEHUB_*` environment variables at startup;
/// invalid or non-positive overrides fall back to the default.
///
/// The Atlas secret is deliberately not part of this struct: it is required,
/// sensitive, and handled separately in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    /// `take` value per Atlas page.
    pub page_size: usize,
    /// Token-bucket capacity per client IP.
    pub inbound_rate_limit_requests: i64,
    /// Refill window for the inbound limiter.
    pub inbound_rate_limit_per: Duration,
    /// `Retry-After` (seconds) sent on inbound 429s.
    pub inbound_retry_after_secs: u64,
    /// Bucket age beyond which the eviction sweep removes it.
    pub inbound_bucket_max_stale: Duration,
    /// Bucket count above which a sweep runs.
    pub inbound_bucket_evict_threshold: usize,
    /// Validity of the derived live context.
    pub live_cache_ttl: Duration,
    /// Total HTTP timeout for Atlas requests.
    pub atlas_client_timeout: Duration,
    /// Floor applied to `Retry-After` waits after an Atlas 429.
    pub atlas_outbound_min_backoff: Duration,
    pub atlas_base_url: Url,
    pub bind_address: SocketAddr,
    /// Enables pagination tracing (`GAMEHUB_DEBUG`).
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 50,
            inbound_rate_limit_requests: 60,
            inbound_rate_limit_per: Duration::from_secs(60),
            inbound_retry_after_secs: 60,
            inbound_bucket_max_stale: Duration::from_secs(5 * 60),
            inbound_bucket_evict_threshold: 100,
            live_cache_ttl: Duration::from_secs(10),
            atlas_client_timeout: Duration::from_secs(30),
            atlas_outbound_min_backoff: Duration::from_secs(1),
            atlas_base_url: ATLAS_DEFAULT_BASE_URL.clone(),
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            debug: false,
        }
    }
}

impl Config {
    /// Read the configuration from the environment once, at startup.
    pub fn load() -> Config {
        let defaults = Config::default();
        let port = env_u16("PORT", 8080);
        Config {
            page_size: env_usize("GAMEHUB_PAGE_SIZE", defaults.page_size),
            inbound_rate_limit_requests: env_i64(
                "GAMEHUB_INBOUND_RATE_LIMIT",
                defaults.inbound_rate_limit_requests,
            ),
            inbound_rate_limit_per: env_secs(
                "GAMEHUB_INBOUND_RATE_LIMIT_PER",
                defaults.inbound_rate_limit_per,
            ),
            inbound_retry_after_secs: env_u64(
                "GAMEHUB_INBOUND_RETRY_AFTER",
                defaults.inbound_retry_after_secs,
            ),
            inbound_bucket_max_stale: env_secs(
                "GAMEHUB_INBOUND_BUCKET_MAX_STALE",
                defaults.inbound_bucket_max_stale,
            ),
            inbound_bucket_evict_threshold: env_usize(
                "GAMEHUB_INBOUND_BUCKET_EVICT_THRESHOLD",
                defaults.inbound_bucket_evict_threshold,
            ),
            live_cache_ttl: env_secs("GAMEHUB_LIVE_CACHE_TTL", defaults.live_cache_ttl),
            atlas_client_timeout: env_secs(
                "GAMEHUB_ATLAS_CLIENT_TIMEOUT",
                defaults.atlas_client_timeout,
            ),
            atlas_outbound_min_backoff: env_millis(
                "GAMEHUB_ATLAS_OUTBOUND_MIN_BACKOFF",
                defaults.atlas_outbound_min_backoff,
            ),
            atlas_base_url: env_url("GAMEHUB_ATLAS_BASE_URL", defaults.atlas_base_url),
            bind_address: SocketAddr::from(([0, 0, 0, 0], port)),
            debug: std::env::var("GAMEHUB_DEBUG").is_ok_and(|v| !v.is_empty()),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok()) {
        Some(n) if n > 0 => n,
        _ => default,
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    match std::env::var(name).ok().and_then(|s| s.parse::<i64>().ok()) {
        Some(n) if n > 0 => n,
        _ => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
    {
        Some(n) if n > 0 => n,
        _ => default,
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    match std::env::var(name).ok().and_then(|s| s.parse::<u16>().ok()) {
        Some(n) if n > 0 => n,
        _ => default,
    }
}

/// Duration override in whole seconds.
fn env_secs(name: &str, default: Duration) -> Duration {
    match std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok()) {
        Some(n) if n > 0 => Duration::from_secs(n),
        _ => default,
    }
}

/// Duration override in whole milliseconds.
fn env_millis(name: &str, default: Duration) -> Duration {
    match std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok()) {
        Some(n) if n > 0 => Duration::from_millis(n),
        _ => default,
    }
}

fn env_url(name: &str, default: Url) -> Url {
    std::env::var(name)
        .ok()
        .and_then(|s| Url::parse(&s).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.inbound_rate_limit_requests, 60);
        assert_eq!(config.inbound_rate_limit_per, Duration::from_secs(60));
        assert_eq!(config.inbound_retry_after_secs, 60);
        assert_eq!(config.inbound_bucket_max_stale, Duration::from_secs(300));
        assert_eq!(config.inbound_bucket_evict_threshold, 100);
        assert_eq!(config.live_cache_ttl, Duration::from_secs(10));
        assert_eq!(config.atlas_client_timeout, Duration::from_secs(30));
        assert_eq!(config.atlas_outbound_min_backoff, Duration::from_secs(1));
        assert_eq!(
            config.atlas_base_url.as_str(),
            "https://atlas.abiosgaming.com/v3/"
        );
        assert_eq!(config.bind_address.port(), 8080);
        assert!(!config.debug);
    }

    #[test]
    fn test_env_overrides_ignore_garbage_and_non_positive_values() {
        // Env mutation is process-global, so probe the helpers directly with
        // variables that are never set.
        assert_eq!(env_u64("GAMEHUB_TEST_UNSET_VAR", 7), 7);
        assert_eq!(
            env_secs("GAMEHUB_TEST_UNSET_VAR", Duration::from_secs(3)),
            Duration::from_secs(3)
        );
        std::env::set_var("GAMEHUB_TEST_GARBAGE_VAR", "not-a-number");
        assert_eq!(env_u64("GAMEHUB_TEST_GARBAGE_VAR", 7), 7);
        std::env::set_var("GAMEHUB_TEST_ZERO_VAR", "0");
        assert_eq!(env_u64("GAMEHUB_TEST_ZERO_VAR", 7), 7);
        std::env::set_var("GAMEHUB_TEST_VALID_VAR", "25");
        assert_eq!(
            env_millis("GAMEHUB_TEST_VALID_VAR", Duration::ZERO),
            Duration::from_millis(25)
        );
    }
}
