use thiserror::Error;

/// Main error type for the venue gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Venue connection errors
    #[error("Venue connection unavailable: {0}")]
    ConnectionUnavailable(String),

    // Venue operation errors
    #[error("Account not found on venue: {login}")]
    AccountNotFound { login: u64 },

    #[error("Permission denied by venue (check manager account rights): {0}")]
    PermissionDenied(String),

    #[error("Venue capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("Limit reached: {0}")]
    LimitReached(String),

    #[error("Venue call timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Remote operation failed: {operation} (venue code {code})")]
    RemoteFailed { operation: String, code: i32 },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Secret storage errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Flat classification of failures, independent of vendor codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionUnavailable,
    AccountNotFound,
    PermissionDenied,
    CapacityExhausted,
    DuplicateEntity,
    InsufficientFunds,
    LimitReached,
    Timeout,
    RemoteFailed,
    Validation,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionUnavailable => "connection_unavailable",
            Self::AccountNotFound => "account_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::CapacityExhausted => "capacity_exhausted",
            Self::DuplicateEntity => "duplicate_entity",
            Self::InsufficientFunds => "insufficient_funds",
            Self::LimitReached => "limit_reached",
            Self::Timeout => "timeout",
            Self::RemoteFailed => "remote_failed",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Internal => "internal",
        }
    }

    /// Read paths swallow these and hand back a default value.
    pub fn is_recoverable_on_read(&self) -> bool {
        matches!(self, Self::AccountNotFound | Self::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionUnavailable(_) => ErrorKind::ConnectionUnavailable,
            Self::AccountNotFound { .. } => ErrorKind::AccountNotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::CapacityExhausted(_) => ErrorKind::CapacityExhausted,
            Self::DuplicateEntity(_) => ErrorKind::DuplicateEntity,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::LimitReached(_) => ErrorKind::LimitReached,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RemoteFailed { .. } => ErrorKind::RemoteFailed,
            Self::Validation(_) | Self::Auth(_) | Self::NotFound(_) => ErrorKind::Validation,
            Self::Database(_) | Self::Migration(_) => ErrorKind::Storage,
            Self::Config(_)
            | Self::Json(_)
            | Self::Crypto(_)
            | Self::Io(_)
            | Self::Internal(_)
            | Self::Other(_) => ErrorKind::Internal,
        }
    }
}
