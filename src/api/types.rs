use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::{Deal, Login, TradingGroup, TransferSaga};
use crate::error::GatewayError;

/// Map a gateway failure onto an HTTP status and message
pub fn reject(err: GatewayError) -> (StatusCode, String) {
    let status = match &err {
        GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
        GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
        GatewayError::NotFound(_) | GatewayError::AccountNotFound { .. } => StatusCode::NOT_FOUND,
        GatewayError::DuplicateEntity(_) => StatusCode::CONFLICT,
        GatewayError::InsufficientFunds { .. } | GatewayError::LimitReached(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GatewayError::ConnectionUnavailable(_) | GatewayError::CapacityExhausted(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        GatewayError::PermissionDenied(_) | GatewayError::RemoteFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {err}");
        } else {
            warn!("Request failed ({}): {err}", err.kind());
        }
    }
    (status, err.to_string())
}

#[derive(Debug, Deserialize)]
pub struct DealsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct DealsResponse {
    pub login: String,
    pub count: usize,
    pub deals: Vec<Deal>,
}

#[derive(Debug, Deserialize)]
pub struct FundOperationBody {
    pub login: Login,
    pub amount: Decimal,
    #[serde(default)]
    pub comment: String,
    pub actor: Option<String>,
    pub expected_owner: Option<i64>,
    /// Opt into the local-only path when the venue cannot be reached
    #[serde(default)]
    pub allow_fallback: bool,
}

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub from_login: Login,
    pub to_login: Login,
    pub amount: Decimal,
    #[serde(default)]
    pub comment: String,
    pub actor: Option<String>,
    pub expected_owner: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PendingTransfersResponse {
    pub count: usize,
    pub transfers: Vec<TransferSaga>,
}

#[derive(Debug, Deserialize)]
pub struct GroupsQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Serialize)]
pub struct GroupsResponse {
    pub count: usize,
    pub groups: Vec<TradingGroup>,
}

#[derive(Debug, Deserialize)]
pub struct AliasBody {
    pub alias: Option<String>,
}
