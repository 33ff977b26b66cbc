use axum::debug_handler;
use axum::response::Json;
use serde_json::{json, Value};

/// A handler for a simple liveness check
#[debug_handler]
pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.0, json!({"status": "ok"}));
    }
}
