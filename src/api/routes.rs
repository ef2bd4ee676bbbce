use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::liveness))
        // Commission ingress
        .route("/webhooks/position-closed", post(handlers::position_closed))
        // System endpoints
        .route("/api/health", get(handlers::get_health))
        .route("/api/settings/rotate", post(handlers::rotate_settings))
        // Group endpoints
        .route("/api/groups", get(handlers::get_groups))
        .route("/api/groups/sync", post(handlers::sync_groups))
        .route("/api/groups/:name/default", put(handlers::put_default_group))
        .route("/api/groups/:name/demo-default", put(handlers::put_demo_default_group))
        .route("/api/groups/:name/alias", put(handlers::put_group_alias))
        // Account endpoints
        .route("/api/accounts/:login/summary", get(handlers::get_account_summary))
        .route("/api/accounts/:login/deals", get(handlers::get_account_deals))
        // Fund endpoints
        .route("/api/funds/transfer", post(handlers::post_transfer))
        .route("/api/funds/transfers/pending", get(handlers::get_pending_transfers))
        .route("/api/funds/:kind", post(handlers::post_fund_operation))
        .with_state(state)
        .layer(cors)
}
