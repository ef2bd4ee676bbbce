//! Composition root: wires the gateway components from configuration.
//!
//! The binary and the integration tests build the same graph; only the
//! store, the venue connector and the ledger differ.

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::PostgresStore;
use crate::api::{ApiTokens, AppState};
use crate::commission::{CommissionIngress, LedgerEntryCreator};
use crate::config::AppConfig;
use crate::connection::{ConnectOptions, ConnectionManager};
use crate::funds::FundRouter;
use crate::gateway::AccountGateway;
use crate::groups::GroupDirectory;
use crate::lookup_cache::FailedLookupCache;
use crate::persistence::{RecordStore, SettingsSource};
use crate::secrets::SecretCipher;
use crate::services::{GroupSyncService, HealthReporter, SettingsRotator};
use crate::venue::{ManagerMode, VenueConnector};

/// External collaborators the gateway is assembled around
pub struct Dependencies {
    pub store: Arc<dyn RecordStore>,
    pub settings: Arc<dyn SettingsSource>,
    /// Set when `store` is backed by PostgreSQL, for health probes
    pub database: Option<Arc<PostgresStore>>,
    pub connector: Arc<dyn VenueConnector>,
    pub cipher: Arc<SecretCipher>,
    pub ledger: Arc<dyn LedgerEntryCreator>,
}

#[derive(Clone)]
pub struct Components {
    pub connections: ConnectionManager,
    pub lookups: FailedLookupCache,
    pub gateway: AccountGateway,
    pub funds: FundRouter,
    pub groups: Arc<GroupDirectory>,
    pub commission: CommissionIngress,
    pub rotator: SettingsRotator,
    pub health: HealthReporter,
}

impl Components {
    /// Must run inside a tokio runtime
    pub fn assemble(config: &AppConfig, deps: Dependencies) -> Self {
        let options = ConnectOptions {
            mode: if config.venue.pump_mode {
                ManagerMode::Pumping
            } else {
                ManagerMode::Default
            },
            timeout: config.venue.connect_timeout(),
        };
        let connections = ConnectionManager::new(
            deps.connector,
            deps.settings.clone(),
            deps.cipher.clone(),
            options,
        );
        let lookups = FailedLookupCache::new(&config.cache);
        let gateway = AccountGateway::new(
            connections.clone(),
            lookups.clone(),
            deps.store.clone(),
            &config.venue,
        );
        let funds = FundRouter::new(gateway.clone(), deps.store.clone(), &config.funds);
        let groups = Arc::new(GroupDirectory::new(gateway.clone(), deps.store.clone()));
        let commission = CommissionIngress::new(deps.store.clone(), deps.ledger);
        let rotator = SettingsRotator::new(
            deps.store.clone(),
            deps.settings,
            connections.clone(),
            deps.cipher,
            config.secrets.hash_iterations,
        );
        let health = HealthReporter::new(
            connections.clone(),
            deps.store,
            deps.database,
            lookups.clone(),
        );

        Self {
            connections,
            lookups,
            gateway,
            funds,
            groups,
            commission,
            rotator,
            health,
        }
    }

    pub fn app_state(&self, tokens: ApiTokens) -> AppState {
        AppState {
            gateway: self.gateway.clone(),
            funds: self.funds.clone(),
            groups: self.groups.clone(),
            commission: self.commission.clone(),
            rotator: self.rotator.clone(),
            health: self.health.clone(),
            tokens: Arc::new(tokens),
        }
    }

    /// None when periodic sync is disabled
    pub fn group_sync_service(&self, config: &AppConfig) -> Option<GroupSyncService> {
        if config.sync.interval_secs == 0 {
            return None;
        }
        Some(GroupSyncService::new(
            self.groups.clone(),
            self.lookups.clone(),
            Duration::from_secs(config.sync.interval_secs),
        ))
    }
}
