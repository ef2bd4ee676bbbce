use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::{
    auth::ensure_admin_authorized,
    state::AppState,
    types::*,
};
use crate::domain::TradingGroup;
use crate::groups::SyncReport;

/// GET /api/groups?active_only=
pub async fn get_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GroupsQuery>,
) -> std::result::Result<Json<GroupsResponse>, (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;
    let groups = state
        .groups
        .list_groups(query.active_only)
        .await
        .map_err(reject)?;
    Ok(Json(GroupsResponse {
        count: groups.len(),
        groups,
    }))
}

/// POST /api/groups/sync
pub async fn sync_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<SyncReport>, (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;
    let report = state.groups.sync_report().await.map_err(reject)?;
    Ok(Json(report))
}

/// PUT /api/groups/:name/default
pub async fn put_default_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> std::result::Result<Json<TradingGroup>, (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;
    let group = state.groups.set_default(&name).await.map_err(reject)?;
    Ok(Json(group))
}

/// PUT /api/groups/:name/demo-default
pub async fn put_demo_default_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> std::result::Result<Json<TradingGroup>, (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;
    let group = state.groups.set_demo_default(&name).await.map_err(reject)?;
    Ok(Json(group))
}

/// PUT /api/groups/:name/alias
pub async fn put_group_alias(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<AliasBody>,
) -> std::result::Result<Json<TradingGroup>, (StatusCode, String)> {
    ensure_admin_authorized(&headers, &state.tokens)?;
    let group = state
        .groups
        .set_alias(&name, body.alias.as_deref())
        .await
        .map_err(reject)?;
    Ok(Json(group))
}
