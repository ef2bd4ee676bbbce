use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, Json};

use crate::api::{
    auth::ensure_webhook_authorized,
    state::AppState,
    types::reject,
};
use crate::commission::{IngestReceipt, PositionClosedPayload};

/// POST /webhooks/position-closed
pub async fn position_closed(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<(StatusCode, Json<IngestReceipt>), (StatusCode, String)> {
    ensure_webhook_authorized(&headers, &state.tokens)?;

    let payload: PositionClosedPayload = serde_json::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))?;

    let receipt = state.commission.ingest(payload).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
