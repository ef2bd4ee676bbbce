use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::api::state::ApiTokens;
use crate::secrets::{constant_time_eq, SecretString};

pub const ADMIN_TOKEN_HEADER: &str = "x-tradegate-admin-token";

/// Short, log-safe identifier for a presented token
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

fn extract_bearer_token(raw: &str) -> Option<&str> {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
}

fn check(
    expected: Option<&SecretString>,
    provided: Option<&str>,
    realm: &str,
) -> std::result::Result<(), (StatusCode, String)> {
    let Some(expected) = expected else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{realm} auth is required but no token is configured"),
        ));
    };

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.expose().as_bytes()) => Ok(()),
        Some(token) => {
            debug!("Rejected {} token {}", realm, token_fingerprint(token));
            Err((
                StatusCode::UNAUTHORIZED,
                format!("{realm} auth failed (invalid token)"),
            ))
        }
        None => Err((
            StatusCode::UNAUTHORIZED,
            format!("{realm} auth failed (missing token)"),
        )),
    }
}

pub fn ensure_admin_authorized(
    headers: &HeaderMap,
    tokens: &ApiTokens,
) -> std::result::Result<(), (StatusCode, String)> {
    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .or_else(|| bearer(headers));
    check(tokens.admin.as_ref(), provided, "admin")
}

pub fn ensure_webhook_authorized(
    headers: &HeaderMap,
    tokens: &ApiTokens,
) -> std::result::Result<(), (StatusCode, String)> {
    check(tokens.webhook.as_ref(), bearer(headers), "webhook")
}
