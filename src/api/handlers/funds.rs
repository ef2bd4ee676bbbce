use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::{
    auth::ensure_admin_authorized,
    state::AppState,
    types::*,
};
use crate::domain::{FundOperationKind, FundOperationRecord, FundRequest, TransferRequest};
use crate::funds::{FallbackPolicy, TransferReceipt};

const API_ACTOR: &str = "admin-api";

fn actor_or_default(actor: Option<String>) -> String {
    actor
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| API_ACTOR.to_string())
}

/// POST /api/funds/:kind
pub async fn post_fund_operation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(kind): Path<String>,
    Json(body): Json<FundOperationBody>,
) -> std::result::Result<(StatusCode, Json<FundOperationRecord>), (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;

    let kind: FundOperationKind = kind
        .parse()
        .map_err(|e: String| (StatusCode::NOT_FOUND, e))?;
    if kind == FundOperationKind::Transfer {
        return Err((
            StatusCode::BAD_REQUEST,
            "transfers take from_login/to_login; use /api/funds/transfer".to_string(),
        ));
    }

    let policy = if body.allow_fallback {
        FallbackPolicy::AllowLocal
    } else {
        FallbackPolicy::RemoteOnly
    };
    let request = FundRequest {
        kind,
        login: body.login,
        amount: body.amount,
        comment: body.comment,
        actor: actor_or_default(body.actor),
        expected_owner: body.expected_owner,
    };

    let record = state
        .funds
        .execute_with(request, policy)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /api/funds/transfer
pub async fn post_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TransferBody>,
) -> std::result::Result<(StatusCode, Json<TransferReceipt>), (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;

    let receipt = state
        .funds
        .transfer(TransferRequest {
            from_login: body.from_login,
            to_login: body.to_login,
            amount: body.amount,
            comment: body.comment,
            actor: actor_or_default(body.actor),
            expected_owner: body.expected_owner,
        })
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/funds/transfers/pending
pub async fn get_pending_transfers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<PendingTransfersResponse>, (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;
    let transfers = state.funds.pending_transfers().await.map_err(reject)?;
    Ok(Json(PendingTransfersResponse {
        count: transfers.len(),
        transfers,
    }))
}
