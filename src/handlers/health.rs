// Health check handler

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::time::Instant;

use crate::app::AppState;

/// GET /api/v1/health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let timestamp = chrono::Utc::now().to_rfc3339();

    let started = Instant::now();
    let database = match state.store.health_check().await {
        Ok(()) => json!({
            "status": "healthy",
            "latency_ms": started.elapsed().as_millis() as u64,
            "error": null
        }),
        Err(e) => json!({
            "status": "unhealthy",
            "error": format!("Database connection failed: {}", e)
        }),
    };
    let healthy = database["status"] == "healthy";

    let response = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": "story-gen-backend",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": timestamp,
        "components": {
            "database": database
        }
    });

    if healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
