use axum::extract::State;
use axum::response::{Html, Json};
use serde_json::Value;

use crate::gateway_util::AppState;

/// The monitoring page is compiled into the binary so the gateway stays a
/// single artifact.
const MONITOR_HTML: &str = include_str!("monitor.html");

/// Current counters and recent history for graphing.
pub async fn stats_handler(State(state): AppState) -> Json<Value> {
    Json(state.metrics.stats())
}

pub async fn monitor_handler() -> Html<&'static str> {
    Html(MONITOR_HTML)
}
