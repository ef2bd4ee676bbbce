use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};

use crate::api::{
    auth::ensure_admin_authorized,
    state::AppState,
    types::*,
};
use crate::domain::{parse_login, AccountSummary};

const DEFAULT_DEAL_WINDOW_DAYS: i64 = 30;

/// GET /api/accounts/:login/summary
pub async fn get_account_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(login): Path<String>,
) -> std::result::Result<Json<AccountSummary>, (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;
    let login = parse_login(&login).ok_or((
        StatusCode::BAD_REQUEST,
        format!("login must be numeric: {login:?}"),
    ))?;

    let summary = state.gateway.account_summary(login).await.map_err(reject)?;
    Ok(Json(summary))
}

/// GET /api/accounts/:login/deals?from=&to=
pub async fn get_account_deals(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(login): Path<String>,
    Query(query): Query<DealsQuery>,
) -> std::result::Result<Json<DealsResponse>, (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;

    let to = query.to.unwrap_or_else(Utc::now);
    let from = query
        .from
        .unwrap_or_else(|| to - Duration::days(DEFAULT_DEAL_WINDOW_DAYS));

    let deals = state
        .gateway
        .get_deals(&login, from, to)
        .await
        .map_err(reject)?;
    Ok(Json(DealsResponse {
        login,
        count: deals.len(),
        deals,
    }))
}
