use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::atlas::{filter_id_in, RateLimitSnapshot};
use crate::error::Error;
use crate::gateway_util::{AppState, AppStateData};

enum EntityKind {
    Players,
    Teams,
}

/// Currently live series, straight from Atlas.
pub async fn series_live_handler(State(state): AppState) -> Result<Response, Error> {
    let params = BTreeMap::from([("filter".to_string(), "lifecycle=live".to_string())]);
    let (body, snapshot) = state.atlas.get_series_all(&params).await?;
    Ok(json_response(body, Some(&snapshot)))
}

/// Players currently playing in live series.
pub async fn players_live_handler(State(state): AppState) -> Result<Response, Error> {
    fetch_live_entities(&state, EntityKind::Players).await
}

/// Teams currently playing in live series.
pub async fn teams_live_handler(State(state): AppState) -> Result<Response, Error> {
    fetch_live_entities(&state, EntityKind::Teams).await
}

async fn fetch_live_entities(
    state: &AppStateData,
    kind: EntityKind,
) -> Result<Response, Error> {
    let live = state.live.get_live_context().await?;
    let ids = match kind {
        EntityKind::Players => &live.player_ids,
        EntityKind::Teams => &live.team_ids,
    };
    if ids.is_empty() {
        // Nothing live: answer an empty array without bothering Atlas.
        return Ok(json_response(Bytes::from_static(b"[]"), None));
    }

    let params = BTreeMap::from([("filter".to_string(), filter_id_in(ids))]);
    let (body, snapshot) = match kind {
        EntityKind::Players => state.atlas.get_players_all(&params).await?,
        EntityKind::Teams => state.atlas.get_teams_all(&params).await?,
    };
    Ok(json_response(body, Some(&snapshot)))
}

/// Body is the (already serialized) JSON array from Atlas; the last page's
/// rate limit info is passed through when known.
fn json_response(body: Bytes, snapshot: Option<&RateLimitSnapshot>) -> Response {
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response();
    if let Some(snapshot) = snapshot {
        if let Some(limit) = snapshot.limit {
            response
                .headers_mut()
                .insert("x-ratelimit-limit", HeaderValue::from(limit));
        }
        if let Some(remaining) = snapshot.remaining {
            response
                .headers_mut()
                .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_response_passes_rate_limit_headers_through() {
        let snapshot = RateLimitSnapshot {
            limit: Some(500),
            burst: None,
            remaining: Some(3),
            reset_ms: Some(1000),
        };
        let response = json_response(Bytes::from_static(b"[]"), Some(&snapshot));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-ratelimit-limit"),
            Some(&HeaderValue::from_static("500"))
        );
        assert_eq!(
            response.headers().get("x-ratelimit-remaining"),
            Some(&HeaderValue::from_static("3"))
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
    }

    #[test]
    fn test_json_response_omits_unknown_headers() {
        let response = json_response(Bytes::from_static(b"[]"), None);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }
}
