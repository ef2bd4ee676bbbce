#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tower::ServiceExt;

use tradegate::api::{create_router, ApiTokens};
use tradegate::commission::{LedgerEntryCreator, LoggingLedger};
use tradegate::config::{AppConfig, IN_MEMORY_DATABASE_URL};
use tradegate::domain::{AccountRecord, Login};
use tradegate::secrets::{SecretCipher, SecretString};
use tradegate::services::RotateSettings;
use tradegate::venue::SimulatedVenue;
use tradegate::{Components, Dependencies, MemoryStore};

pub const ADMIN_TOKEN: &str = "admin-token-for-tests";
pub const WEBHOOK_TOKEN: &str = "webhook-token-for-tests";
pub const MASTER_KEY: [u8; 32] = [9; 32];

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::offline(IN_MEMORY_DATABASE_URL);
    config.secrets.hash_iterations = 1_000;
    config.venue.request_timeout_ms = 2_000;
    config
}

pub struct TestGateway {
    pub venue: SimulatedVenue,
    pub store: Arc<MemoryStore>,
    pub components: Components,
}

impl TestGateway {
    /// Gateway with no settings row yet
    pub fn bare(config: &AppConfig, ledger: Arc<dyn LedgerEntryCreator>) -> Self {
        let venue = SimulatedVenue::with_demo_data();
        let store = Arc::new(MemoryStore::new());
        let components = Components::assemble(
            config,
            Dependencies {
                store: store.clone(),
                settings: store.clone(),
                database: None,
                connector: Arc::new(venue.connector()),
                cipher: Arc::new(SecretCipher::new(&MASTER_KEY).unwrap()),
                ledger,
            },
        );
        Self {
            venue,
            store,
            components,
        }
    }

    pub async fn start() -> Self {
        Self::start_with(&test_config(), Arc::new(LoggingLedger)).await
    }

    pub async fn start_with(config: &AppConfig, ledger: Arc<dyn LedgerEntryCreator>) -> Self {
        let gateway = Self::bare(config, ledger);
        gateway.rotate("venue-a.test:443").await;
        gateway
    }

    pub async fn rotate(&self, address: &str) {
        self.components
            .rotator
            .rotate(RotateSettings {
                server_address: address.to_string(),
                login: 1000,
                secret: SecretString::new("manager-pw"),
                display_name: String::new(),
            })
            .await
            .unwrap();
    }

    /// Account present on the venue and in the local mirror
    pub async fn seed_account(&self, login: Login, owner_user_id: i64, balance: Decimal) {
        self.venue.add_account(login, "real\\standard", balance);
        self.seed_local_account(login, owner_user_id, balance).await;
    }

    pub async fn seed_local_account(&self, login: Login, owner_user_id: i64, balance: Decimal) {
        use tradegate::RecordStore;
        self.store
            .upsert_account(&AccountRecord {
                login,
                owner_user_id,
                balance,
                group_name: Some("real\\standard".to_string()),
                active: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    pub fn router(&self) -> Router {
        create_router(
            self.components
                .app_state(ApiTokens::new(Some(ADMIN_TOKEN), Some(WEBHOOK_TOKEN))),
        )
    }
}

/// Send one request through the router and return status plus JSON body
pub async fn send(
    router: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<String>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, json)
}
