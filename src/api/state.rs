use std::sync::Arc;

use crate::commission::CommissionIngress;
use crate::config::ApiConfig;
use crate::funds::FundRouter;
use crate::gateway::AccountGateway;
use crate::groups::GroupDirectory;
use crate::secrets::SecretString;
use crate::services::{HealthReporter, SettingsRotator};

/// Bearer tokens accepted by the API, resolved once at startup
#[derive(Clone, Default)]
pub struct ApiTokens {
    pub admin: Option<SecretString>,
    pub webhook: Option<SecretString>,
}

impl ApiTokens {
    /// Read the tokens from the environment variables named in the config
    pub fn from_env(config: &ApiConfig) -> Self {
        Self {
            admin: read_token(&config.admin_token_env),
            webhook: read_token(&config.webhook_token_env),
        }
    }

    pub fn new(admin: Option<&str>, webhook: Option<&str>) -> Self {
        Self {
            admin: admin.map(SecretString::new),
            webhook: webhook.map(SecretString::new),
        }
    }
}

fn read_token(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: AccountGateway,
    pub funds: FundRouter,
    pub groups: Arc<GroupDirectory>,
    pub commission: CommissionIngress,
    pub rotator: SettingsRotator,
    pub health: HealthReporter,
    pub tokens: Arc<ApiTokens>,
}
