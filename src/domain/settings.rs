use chrono::{DateTime, Utc};
use serde::Serialize;

/// One row of venue manager credentials.
///
/// Rows are append-only: the newest `created_at` is authoritative and older
/// rows stay for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSettings {
    pub id: i64,
    pub server_address: String,
    pub login: u64,
    /// `pbkdf2_sha256$<iterations>$<salt>$<hash>`
    #[serde(skip_serializing)]
    pub secret_hash: String,
    /// Encrypted copy handed to the venue at connect time
    #[serde(skip_serializing)]
    pub secret_reversible: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl ConnectionSettings {
    /// True when a handle built from `self` is still valid for `latest`.
    pub fn is_same_revision(&self, latest: &ConnectionSettings) -> bool {
        self.id == latest.id
            && self.created_at == latest.created_at
            && self.server_address == latest.server_address
            && self.login == latest.login
            && self.secret_reversible == latest.secret_reversible
    }
}

/// Insert payload for a credential rotation
#[derive(Debug, Clone)]
pub struct NewConnectionSettings {
    pub server_address: String,
    pub login: u64,
    pub secret_hash: String,
    pub secret_reversible: String,
    pub display_name: String,
}
