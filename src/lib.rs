pub mod adapters;
pub mod api;
pub mod app;
pub mod cli;
pub mod commission;
pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod funds;
pub mod gateway;
pub mod groups;
pub mod lookup_cache;
pub mod persistence;
pub mod secrets;
pub mod services;
pub mod venue;

#[cfg(test)]
pub(crate) mod test_support;

pub use app::{Components, Dependencies};
pub use config::AppConfig;
pub use connection::{ConnectionManager, ManagedConnection};
pub use error::{ErrorKind, GatewayError, Result};
pub use funds::{FallbackPolicy, FundRouter};
pub use gateway::AccountGateway;
pub use groups::GroupDirectory;
pub use lookup_cache::FailedLookupCache;
pub use persistence::{MemoryStore, RecordStore, SettingsSource};
