use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub venue: VenueConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub funds: FundsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    /// Timeout for the connect call in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for a single read/write call in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Maximum span of a historical deal query
    #[serde(default = "default_deal_range_cap_days")]
    pub deal_range_cap_days: i64,
    /// Subscribe to pumping (push) mode on connect
    #[serde(default)]
    pub pump_mode: bool,
    /// Run against the in-process simulated venue
    #[serde(default)]
    pub simulated: bool,
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_deal_range_cap_days() -> i64 {
    90
}

impl VenueConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            deal_range_cap_days: default_deal_range_cap_days(),
            pump_mode: false,
            simulated: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// How long a confirmed-missing account is skipped (seconds)
    #[serde(default = "default_failed_lookup_ttl_secs")]
    pub failed_lookup_ttl_secs: u64,
    /// Diagnostic logs allowed per key per window
    #[serde(default = "default_max_log_rate")]
    pub max_log_rate: u32,
    /// Counter ceiling; occurrences beyond this are not tracked
    #[serde(default = "default_log_ceiling")]
    pub log_ceiling: u32,
    /// Upper bound on tracked keys before a sweep is forced
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_failed_lookup_ttl_secs() -> u64 {
    300
}

fn default_max_log_rate() -> u32 {
    3
}

fn default_log_ceiling() -> u32 {
    100
}

fn default_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            failed_lookup_ttl_secs: default_failed_lookup_ttl_secs(),
            max_log_rate: default_max_log_rate(),
            log_ceiling: default_log_ceiling(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Database URL that selects the in-process store
pub const IN_MEMORY_DATABASE_URL: &str = "memory://";

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.url.trim() == IN_MEMORY_DATABASE_URL
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Environment variable holding the admin bearer token
    #[serde(default = "default_admin_token_env")]
    pub admin_token_env: String,
    /// Environment variable holding the commission webhook token
    #[serde(default = "default_webhook_token_env")]
    pub webhook_token_env: String,
}

fn default_api_port() -> u16 {
    8080
}

fn default_admin_token_env() -> String {
    "TRADEGATE_ADMIN_TOKEN".to_string()
}

fn default_webhook_token_env() -> String {
    "TRADEGATE_WEBHOOK_TOKEN".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            admin_token_env: default_admin_token_env(),
            webhook_token_env: default_webhook_token_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    /// Environment variable holding the base64 AES-256 master key
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
    /// PBKDF2 iterations for the verification hash
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,
}

fn default_master_key_env() -> String {
    "TRADEGATE_MASTER_KEY".to_string()
}

fn default_hash_iterations() -> u32 {
    600_000
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            master_key_env: default_master_key_env(),
            hash_iterations: default_hash_iterations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FundsConfig {
    /// Per-operation cap in account currency (None = unlimited)
    #[serde(default)]
    pub max_operation_amount: Option<Decimal>,
    /// Allow callers to opt into the local-only fallback path
    #[serde(default)]
    pub allow_offline_fallback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Seconds between background group syncs (0 = disabled)
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
}

fn default_sync_interval_secs() -> u64 {
    3600
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .set_default("venue.connect_timeout_ms", default_connect_timeout_ms())?
            .set_default("venue.request_timeout_ms", default_request_timeout_ms())?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRADEGATE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // TRADEGATE_DATABASE__URL, TRADEGATE_VENUE__SIMULATED, ...
            .add_source(
                Environment::with_prefix("TRADEGATE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration used by the offline CLI paths and tests
    pub fn offline(database_url: &str) -> Self {
        Self {
            venue: VenueConfig {
                simulated: true,
                ..VenueConfig::default()
            },
            cache: CacheConfig::default(),
            database: DatabaseConfig {
                url: database_url.to_string(),
                max_connections: default_max_connections(),
            },
            api: ApiConfig::default(),
            secrets: SecretsConfig::default(),
            funds: FundsConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.venue.request_timeout_ms == 0 {
            errors.push("venue.request_timeout_ms must be positive".to_string());
        }

        if self.venue.connect_timeout_ms == 0 {
            errors.push("venue.connect_timeout_ms must be positive".to_string());
        }

        if self.venue.deal_range_cap_days <= 0 {
            errors.push("venue.deal_range_cap_days must be positive".to_string());
        }

        if self.cache.max_log_rate == 0 {
            errors.push("cache.max_log_rate must be at least 1".to_string());
        }

        if self.cache.log_ceiling < self.cache.max_log_rate {
            errors.push("cache.log_ceiling must be >= cache.max_log_rate".to_string());
        }

        if self.secrets.hash_iterations < 1_000 {
            errors.push("secrets.hash_iterations is too low (min 1000)".to_string());
        }

        if let Some(max) = self.funds.max_operation_amount {
            if max <= Decimal::ZERO {
                errors.push("funds.max_operation_amount must be positive".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
