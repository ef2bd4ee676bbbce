//! Venue credential rotation
//!
//! Rotation never edits history: it appends a settings row and then
//! invalidates the live connection so the next call rebuilds against it.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::connection::ConnectionManager;
use crate::domain::{ConnectionSettings, Login, NewConnectionSettings};
use crate::error::{GatewayError, Result};
use crate::persistence::{RecordStore, SettingsSource};
use crate::secrets::{hash_secret, verify_secret, SecretCipher, SecretString};

/// New venue credentials as supplied by an operator
#[derive(Debug, Clone, Deserialize)]
pub struct RotateSettings {
    pub server_address: String,
    pub login: Login,
    #[serde(rename = "password")]
    pub secret: SecretString,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Clone)]
pub struct SettingsRotator {
    store: Arc<dyn RecordStore>,
    settings: Arc<dyn SettingsSource>,
    connections: ConnectionManager,
    cipher: Arc<SecretCipher>,
    hash_iterations: u32,
}

impl SettingsRotator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        settings: Arc<dyn SettingsSource>,
        connections: ConnectionManager,
        cipher: Arc<SecretCipher>,
        hash_iterations: u32,
    ) -> Self {
        Self {
            store,
            settings,
            connections,
            cipher,
            hash_iterations,
        }
    }

    #[instrument(skip(self, request), fields(server = %request.server_address, login = request.login))]
    pub async fn rotate(&self, request: RotateSettings) -> Result<ConnectionSettings> {
        let server_address = request.server_address.trim().to_string();
        if server_address.is_empty() {
            return Err(GatewayError::Validation("server_address is required".into()));
        }
        if request.login == 0 {
            return Err(GatewayError::Validation("login must be positive".into()));
        }
        if request.secret.is_empty() {
            return Err(GatewayError::Validation("password is required".into()));
        }

        let secret_reversible = self.cipher.encrypt(&request.secret)?;
        let iterations = self.hash_iterations;
        let secret = request.secret;
        let secret_hash = tokio::task::spawn_blocking(move || hash_secret(&secret, iterations))
            .await
            .map_err(|e| GatewayError::Internal(format!("hash task failed: {e}")))?;

        let display_name = if request.display_name.trim().is_empty() {
            server_address.clone()
        } else {
            request.display_name.trim().to_string()
        };

        let row = self
            .store
            .insert_connection_settings(&NewConnectionSettings {
                server_address,
                login: request.login,
                secret_hash,
                secret_reversible,
                display_name,
            })
            .await?;

        self.connections.invalidate_async().await?;
        info!(
            "Venue settings rotated to {} (id {})",
            row.server_address, row.id
        );
        Ok(row)
    }

    /// Check a candidate password against the live settings row
    pub async fn verify_current(&self, candidate: SecretString) -> Result<bool> {
        let Some(latest) = self.settings.latest_settings().await? else {
            return Ok(false);
        };
        tokio::task::spawn_blocking(move || verify_secret(&candidate, &latest.secret_hash))
            .await
            .map_err(|e| GatewayError::Internal(format!("verify task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    fn rotator(h: &Harness) -> SettingsRotator {
        SettingsRotator::new(
            h.store.clone(),
            h.store.clone(),
            h.manager.clone(),
            h.cipher.clone(),
            1_000,
        )
    }

    fn request(address: &str, password: &str) -> RotateSettings {
        RotateSettings {
            server_address: address.to_string(),
            login: 1000,
            secret: SecretString::new(password),
            display_name: String::new(),
        }
    }

    #[tokio::test]
    async fn rotation_appends_row_and_reconnects() {
        let h = Harness::connected().await;
        let old = h.manager.get_connection().await.unwrap();
        let rotator = rotator(&h);

        let row = rotator
            .rotate(request(" venue-new:443 ", "fresh"))
            .await
            .unwrap();
        assert_eq!(row.server_address, "venue-new:443");
        assert_eq!(row.display_name, "venue-new:443");
        assert!(row.secret_hash.starts_with("pbkdf2_sha256$1000$"));
        assert!(!old.is_connected());

        let conn = h.manager.get_connection().await.unwrap();
        assert_eq!(conn.settings().id, row.id);
        assert_eq!(h.venue.last_connect().unwrap().0, "venue-new:443");

        assert!(rotator.verify_current(SecretString::new("fresh")).await.unwrap());
        assert!(!rotator.verify_current(SecretString::new("stale")).await.unwrap());
    }

    #[tokio::test]
    async fn incomplete_request_is_rejected() {
        let h = Harness::connected().await;
        let rotator = rotator(&h);
        assert!(matches!(
            rotator.rotate(request("", "pw")).await,
            Err(GatewayError::Validation(_))
        ));
        assert!(matches!(
            rotator.rotate(request("venue:443", "")).await,
            Err(GatewayError::Validation(_))
        ));
    }
}
