//! Route definitions and endpoint mappings for the gateway API.

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::endpoints;
use crate::gateway_util::AppStateData;
use crate::metrics;
use crate::rate_limit;

pub fn build_router(app_state: AppStateData) -> Router {
    // Only the API routes sit behind the inbound limiter; /health and the
    // monitoring surface stay reachable while a client is throttled.
    let api_routes = Router::new()
        .route("/series/live", get(endpoints::live::series_live_handler))
        .route("/players/live", get(endpoints::live::players_live_handler))
        .route("/teams/live", get(endpoints::live::teams_live_handler))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .merge(api_routes)
        .route("/health", get(endpoints::status::health_handler))
        .route("/stats", get(endpoints::stats::stats_handler))
        .route("/monitor", get(endpoints::stats::monitor_handler))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            metrics::track_requests,
        ))
        .with_state(app_state)
}
