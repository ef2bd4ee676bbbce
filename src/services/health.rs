//! Health reporting for the admin API and supervision probes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapters::PostgresStore;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::lookup_cache::FailedLookupCache;
use crate::persistence::RecordStore;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    fn new(name: &str, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
        }
    }
}

/// Overall service health response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub connection: ConnectionStatus,
}

#[derive(Clone)]
pub struct HealthReporter {
    connections: ConnectionManager,
    store: Arc<dyn RecordStore>,
    database: Option<Arc<PostgresStore>>,
    lookups: FailedLookupCache,
    started_at: DateTime<Utc>,
}

impl HealthReporter {
    /// `database` is None when running on the in-memory store
    pub fn new(
        connections: ConnectionManager,
        store: Arc<dyn RecordStore>,
        database: Option<Arc<PostgresStore>>,
        lookups: FailedLookupCache,
    ) -> Self {
        Self {
            connections,
            store,
            database,
            lookups,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    pub async fn report(&self) -> HealthResponse {
        let mut components = Vec::new();

        // Venue: a lazily built handle that is simply not there yet is fine
        let connection = self.connections.status();
        let venue = match (&connection.last_error, connection.connected) {
            (_, true) => ComponentHealth::new("venue", HealthStatus::Healthy, None),
            (Some(err), false) => {
                ComponentHealth::new("venue", HealthStatus::Unhealthy, Some(err.clone()))
            }
            (None, false) => ComponentHealth::new(
                "venue",
                HealthStatus::Degraded,
                Some("not connected yet".to_string()),
            ),
        };
        components.push(venue);

        let database = match &self.database {
            Some(db) if db.ping().await => ComponentHealth::new("database", HealthStatus::Healthy, None),
            Some(_) => ComponentHealth::new(
                "database",
                HealthStatus::Unhealthy,
                Some("Disconnected".to_string()),
            ),
            None => ComponentHealth::new(
                "database",
                HealthStatus::Healthy,
                Some("in-memory store".to_string()),
            ),
        };
        components.push(database);

        let transfers = match self.store.pending_transfer_sagas().await {
            Ok(pending) => {
                let stuck = pending
                    .iter()
                    .filter(|s| s.state.needs_reconciliation())
                    .count();
                if stuck > 0 {
                    ComponentHealth::new(
                        "transfers",
                        HealthStatus::Degraded,
                        Some(format!("{stuck} transfers need manual reconciliation")),
                    )
                } else if pending.is_empty() {
                    ComponentHealth::new("transfers", HealthStatus::Healthy, None)
                } else {
                    ComponentHealth::new(
                        "transfers",
                        HealthStatus::Healthy,
                        Some(format!("{} in flight", pending.len())),
                    )
                }
            }
            Err(e) => ComponentHealth::new("transfers", HealthStatus::Unhealthy, Some(e.to_string())),
        };
        components.push(transfers);

        components.push(ComponentHealth::new(
            "lookup_cache",
            HealthStatus::Healthy,
            Some(format!("{} suppressed lookups", self.lookups.len())),
        ));

        let status = components
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

        HealthResponse {
            status,
            timestamp: Utc::now(),
            uptime_seconds: self.uptime_seconds(),
            components,
            connection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    #[test]
    fn worst_status_wins() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(HealthStatus::Degraded),
            HealthStatus::Unhealthy
        );
        assert!(HealthStatus::Healthy.worst(HealthStatus::Healthy).is_healthy());
    }

    #[tokio::test]
    async fn report_reflects_connection_state() {
        let h = Harness::connected().await;
        let reporter = HealthReporter::new(
            h.manager.clone(),
            h.store.clone(),
            None,
            h.gateway.lookups().clone(),
        );

        assert_eq!(reporter.report().await.status, HealthStatus::Degraded);

        h.manager.get_connection().await.unwrap();
        let report = reporter.report().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.connection.connected);
    }
}
