//! End-to-end tests: the full router, with a mock Atlas server upstream.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Query;
use axum::http::{header, Request, StatusCode};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;
use url::Url;

use gamehub::atlas::AtlasClient;
use gamehub::config::Config;
use gamehub::gateway_util::AppStateData;
use gamehub::metrics::Metrics;
use gamehub::routes::build_router;

async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("mock upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve mock");
    });
    addr
}

async fn test_app(upstream: Router, config: Config) -> Router {
    let addr = spawn_upstream(upstream).await;
    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());
    let atlas = Arc::new(
        AtlasClient::with_base_url(
            Url::parse(&format!("http://{addr}")).expect("mock base url"),
            SecretString::from("test-secret".to_string()),
            config.clone(),
            metrics.clone(),
        )
        .expect("build atlas client"),
    );
    build_router(AppStateData::with_atlas(config, atlas, metrics))
}

/// Mock Atlas serving one live series with two rosters worth of teams and
/// players, echoing the filters it receives.
fn live_upstream() -> Router {
    Router::new()
        .route(
            "/series",
            get(|| async {
                Json(json!([
                    {"participants": [{"roster": {"id": 11}}, {"roster": {"id": 12}}]},
                ]))
            }),
        )
        .route(
            "/rosters",
            get(|| async {
                Json(json!([
                    {"team": {"id": 100}, "line_up": {"players": [{"id": 1}, {"id": 2}]}},
                    {"team": {"id": 101}, "line_up": {"players": [{"id": 2}, {"id": 3}]}},
                ]))
            }),
        )
        .route(
            "/players",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(
                    params.get("filter").map(String::as_str),
                    Some("id<={1,2,3}"),
                    "players must be fetched with the live player-ID filter"
                );
                Json(json!([{"id": 1}, {"id": 2}, {"id": 3}]))
            }),
        )
        .route(
            "/teams",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(
                    params.get("filter").map(String::as_str),
                    Some("id<={100,101}"),
                    "teams must be fetched with the live team-ID filter"
                );
                Json(json!([{"id": 100}, {"id": 101}]))
            }),
        )
}

async fn get_response(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn test_health_returns_ok() {
    let app = test_app(Router::new(), Config::default()).await;
    let response = get_response(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_series_live_passes_through_upstream() {
    let upstream = Router::new().route(
        "/series",
        get(|Query(params): Query<HashMap<String, String>>| async move {
            assert_eq!(
                params.get("filter").map(String::as_str),
                Some("lifecycle=live")
            );
            (
                [
                    ("x-ratelimit-limit", "500"),
                    ("x-ratelimit-remaining", "499"),
                ],
                Json(json!([{"id": 9000, "title": "grand final"}])),
            )
        }),
    );
    let app = test_app(upstream, Config::default()).await;

    let response = get_response(&app, "/series/live").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-ratelimit-limit").map(|v| v.as_bytes()),
        Some(&b"500"[..])
    );
    assert_eq!(
        response
            .headers()
            .get("x-ratelimit-remaining")
            .map(|v| v.as_bytes()),
        Some(&b"499"[..])
    );
    assert_eq!(
        body_json(response).await,
        json!([{"id": 9000, "title": "grand final"}])
    );
}

#[tokio::test]
async fn test_players_live_resolves_live_context() {
    let app = test_app(live_upstream(), Config::default()).await;
    let response = get_response(&app, "/players/live").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!([{"id": 1}, {"id": 2}, {"id": 3}])
    );
}

#[tokio::test]
async fn test_teams_live_resolves_live_context() {
    let app = test_app(live_upstream(), Config::default()).await;
    let response = get_response(&app, "/teams/live").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([{"id": 100}, {"id": 101}]));
}

#[tokio::test]
async fn test_no_live_series_yields_empty_array_without_entity_fetch() {
    let players_hits = Arc::new(AtomicUsize::new(0));
    let players_hits_counted = players_hits.clone();
    let upstream = Router::new()
        .route("/series", get(|| async { Json(json!([])) }))
        .route(
            "/players",
            get(move || {
                let hits = players_hits_counted.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!([]))
                }
            }),
        );
    let app = test_app(upstream, Config::default()).await;

    let response = get_response(&app, "/players/live").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
    assert_eq!(players_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inbound_limiter_caps_requests_per_client() {
    // Capacity 2, window 1 s, single client: two requests pass, the third is
    // denied with the configured Retry-After.
    let config = Config {
        inbound_rate_limit_requests: 2,
        inbound_rate_limit_per: Duration::from_secs(1),
        ..Config::default()
    };
    let app = test_app(live_upstream(), config).await;

    for _ in 0..2 {
        let response = get_response(&app, "/series/live").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = get_response(&app, "/series/live").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|v| v.as_bytes()),
        Some(&b"60"[..])
    );
}

#[tokio::test]
async fn test_limiter_separates_clients_by_forwarded_for() {
    let config = Config {
        inbound_rate_limit_requests: 1,
        inbound_rate_limit_per: Duration::from_secs(60),
        ..Config::default()
    };
    let app = test_app(live_upstream(), config).await;

    let request = |ip: &str| {
        Request::builder()
            .uri("/series/live")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .expect("request")
    };

    let response = app.clone().oneshot(request("203.0.113.1")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.clone().oneshot(request("203.0.113.1")).await.expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different client is admitted with its own bucket.
    let response = app.clone().oneshot(request("203.0.113.2")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upstream_429_propagates_with_retry_after_ms() {
    let upstream = Router::new().route(
        "/series",
        get(|| async {
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "30")],
                "rate limited",
            )
        }),
    );
    let config = Config {
        atlas_outbound_min_backoff: Duration::from_millis(1),
        ..Config::default()
    };
    let app = test_app(upstream, config).await;

    let response = get_response(&app, "/series/live").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|v| v.as_bytes()),
        Some(&b"30"[..])
    );
}

#[tokio::test]
async fn test_upstream_http_error_maps_to_500() {
    let upstream = Router::new().route(
        "/series",
        get(|| async { (StatusCode::BAD_GATEWAY, "upstream exploded") }),
    );
    let app = test_app(upstream, Config::default()).await;

    let response = get_response(&app, "/series/live").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    let message = body["error"].as_str().expect("error message");
    assert!(message.contains("status 502"), "got: {message}");
}

#[tokio::test]
async fn test_stats_and_monitor_are_excluded_from_totals() {
    let app = test_app(Router::new(), Config::default()).await;

    for _ in 0..2 {
        let response = get_response(&app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = get_response(&app, "/monitor").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get_response(&app, "/stats").await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["total"]["requests"], 2);
    assert_eq!(stats["total"]["ok"], 2);
}

#[tokio::test]
async fn test_derivation_is_cached_within_ttl() {
    let series_hits = Arc::new(AtomicUsize::new(0));
    let series_hits_counted = series_hits.clone();
    let upstream = Router::new()
        .route(
            "/series",
            get(move || {
                let hits = series_hits_counted.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!([
                        {"participants": [{"roster": {"id": 11}}]},
                    ]))
                }
            }),
        )
        .route(
            "/rosters",
            get(|| async {
                Json(json!([
                    {"team": {"id": 100}, "line_up": {"players": [{"id": 1}]}},
                ]))
            }),
        )
        .route("/players", get(|| async { Json(json!([{"id": 1}])) }));
    let app = test_app(upstream, Config::default()).await;

    for _ in 0..3 {
        let response = get_response(&app, "/players/live").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(
        series_hits.load(Ordering::SeqCst),
        1,
        "the live context must be derived once within the TTL"
    );
}
