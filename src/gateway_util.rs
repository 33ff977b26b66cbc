use std::sync::Arc;

use secrecy::SecretString;

use crate::atlas::AtlasClient;
use crate::config::Config;
use crate::error::Error;
use crate::live::LiveService;
use crate::metrics::Metrics;
use crate::rate_limit::Limiter;

/// State for the API
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub atlas: Arc<AtlasClient>,
    pub live: Arc<LiveService>,
    pub limiter: Arc<Limiter>,
    pub metrics: Arc<Metrics>,
}

pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    pub fn new(config: Arc<Config>, secret: SecretString) -> Result<Self, Error> {
        let metrics = Arc::new(Metrics::new());
        let atlas = Arc::new(AtlasClient::new(secret, config.clone(), metrics.clone())?);
        Ok(Self::with_atlas(config, atlas, metrics))
    }

    /// Assemble state around an existing client (tests point it at a mock).
    pub fn with_atlas(
        config: Arc<Config>,
        atlas: Arc<AtlasClient>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let live = Arc::new(LiveService::new(atlas.clone(), config.live_cache_ttl));
        let limiter = Arc::new(Limiter::new(
            config.inbound_rate_limit_requests,
            config.inbound_rate_limit_per,
            config.inbound_bucket_evict_threshold,
            config.inbound_bucket_max_stale,
        ));
        Self {
            config,
            atlas,
            live,
            limiter,
            metrics,
        }
    }
}
