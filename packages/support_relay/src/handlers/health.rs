use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns relay status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let counts = state.router.registry().counts().await;
    let metrics = state.metrics.snapshot();

    let status = if metrics.errors.persistence == 0 && metrics.errors.delivery == 0 {
        "ok"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        connections: metrics.connections.active,
        admins_online: counts.admins,
        visitors_online: counts.visitors,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed relay metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 once the message store answers
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    if let Err(e) = state.repo.ping().await {
        warn!("Readiness check failed: {}", e);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected"
            })),
        )
            .into_response();
    }

    let stats = state.db.get_stats().await.ok();
    Json(serde_json::json!({
        "status": "ready",
        "database": "connected",
        "store": stats,
    }))
    .into_response()
}
