//! Fixtures shared by unit tests

use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, VenueConfig};
use crate::connection::{ConnectOptions, ConnectionManager};
use crate::domain::{AccountRights, Login, NewAccount, NewConnectionSettings};
use crate::gateway::AccountGateway;
use crate::lookup_cache::FailedLookupCache;
use crate::persistence::{MemoryStore, RecordStore};
use crate::secrets::{SecretCipher, SecretString};
use crate::venue::SimulatedVenue;

pub(crate) const TEST_KEY: [u8; 32] = [7; 32];

pub(crate) struct Harness {
    pub venue: SimulatedVenue,
    pub store: Arc<MemoryStore>,
    pub cipher: Arc<SecretCipher>,
    pub manager: ConnectionManager,
    pub gateway: AccountGateway,
}

impl Harness {
    fn build(request_timeout: Duration) -> Self {
        let venue = SimulatedVenue::with_demo_data();
        let store = Arc::new(MemoryStore::new());
        let cipher = Arc::new(SecretCipher::new(&TEST_KEY).expect("test key"));
        let manager = ConnectionManager::new(
            Arc::new(venue.connector()),
            store.clone(),
            cipher.clone(),
            ConnectOptions::default(),
        );
        let venue_config = VenueConfig {
            request_timeout_ms: request_timeout.as_millis() as u64,
            ..Default::default()
        };
        let gateway = AccountGateway::new(
            manager.clone(),
            FailedLookupCache::new(&CacheConfig::default()),
            store.clone(),
            &venue_config,
        );
        Self {
            venue,
            store,
            cipher,
            manager,
            gateway,
        }
    }

    /// No settings row yet: every venue call fails with ConnectionUnavailable
    pub fn without_settings() -> Self {
        Self::build(Duration::from_secs(5))
    }

    pub async fn connected() -> Self {
        Self::with_timeout(Duration::from_secs(5)).await
    }

    pub async fn with_timeout(request_timeout: Duration) -> Self {
        let harness = Self::build(request_timeout);
        harness.rotate("venue.test:443").await;
        harness
    }

    pub async fn rotate(&self, address: &str) {
        let blob = self
            .cipher
            .encrypt(&SecretString::new("manager-pw"))
            .expect("encrypt");
        self.store
            .insert_connection_settings(&NewConnectionSettings {
                server_address: address.to_string(),
                login: 1000,
                secret_hash: String::new(),
                secret_reversible: blob,
                display_name: "test venue".to_string(),
            })
            .await
            .expect("insert settings");
    }

    pub fn new_account(login: Login) -> NewAccount {
        NewAccount {
            login,
            name: "Test Client".to_string(),
            group: "real\\standard".to_string(),
            leverage: 100,
            rights: AccountRights::DEFAULT_NEW,
            email: None,
            main_password: SecretString::new("Main#123"),
            investor_password: SecretString::new("Inv#123"),
        }
    }
}
