use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::{
    auth::ensure_admin_authorized,
    state::AppState,
    types::reject,
};
use crate::domain::ConnectionSettings;
use crate::services::{HealthResponse, HealthStatus, RotateSettings};

/// GET /health -- unauthenticated liveness probe
pub async fn liveness() -> &'static str {
    "ok"
}

/// GET /api/health
pub async fn get_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<(StatusCode, Json<HealthResponse>), (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;
    let report = state.health.report().await;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    Ok((status, Json(report)))
}

/// POST /api/settings/rotate
pub async fn rotate_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RotateSettings>,
) -> std::result::Result<(StatusCode, Json<ConnectionSettings>), (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;
    let row = state.rotator.rotate(body).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(row)))
}
