use serde::Serialize;

use crate::error::{ErrorKind, GatewayError};

/// Vendor return code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VenueCode(pub i32);

impl VenueCode {
    pub const OK: Self = Self(0);
    pub const OK_NONE: Self = Self(1);
    pub const ERROR: Self = Self(2);
    pub const ERR_PARAMS: Self = Self(3);
    pub const ERR_NETWORK: Self = Self(7);
    pub const ERR_PERMISSIONS: Self = Self(8);
    pub const ERR_TIMEOUT: Self = Self(9);
    pub const ERR_CONNECTION: Self = Self(10);
    pub const ERR_NOSERVICE: Self = Self(11);
    pub const ERR_FREQUENT: Self = Self(12);
    pub const ERR_NOTFOUND: Self = Self(13);
    pub const ERR_DUPLICATE: Self = Self(17);
    pub const AUTH_ACCOUNT_INVALID: Self = Self(1002);
    pub const USR_LOGIN_EXHAUSTED: Self = Self(3001);
    pub const USR_LOGIN_PROHIBITED: Self = Self(3002);
    pub const USR_LOGIN_EXIST: Self = Self(3004);
    pub const USR_LIMIT_REACHED: Self = Self(3009);
    pub const TRADE_LIMIT_REACHED: Self = Self(10033);
    pub const TRADE_NO_MONEY: Self = Self(10019);

    pub fn is_ok(&self) -> bool {
        *self == Self::OK || *self == Self::OK_NONE
    }
}

impl std::fmt::Display for VenueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map a vendor code to the gateway's error taxonomy
pub fn classify(code: VenueCode) -> ErrorKind {
    match code {
        VenueCode::ERR_NOTFOUND => ErrorKind::AccountNotFound,
        VenueCode::ERR_PERMISSIONS | VenueCode::USR_LOGIN_PROHIBITED => {
            ErrorKind::PermissionDenied
        }
        VenueCode::USR_LOGIN_EXHAUSTED => ErrorKind::CapacityExhausted,
        VenueCode::ERR_DUPLICATE | VenueCode::USR_LOGIN_EXIST => ErrorKind::DuplicateEntity,
        VenueCode::TRADE_NO_MONEY => ErrorKind::InsufficientFunds,
        VenueCode::USR_LIMIT_REACHED | VenueCode::TRADE_LIMIT_REACHED => ErrorKind::LimitReached,
        VenueCode::ERR_TIMEOUT => ErrorKind::Timeout,
        VenueCode::ERR_NETWORK
        | VenueCode::ERR_CONNECTION
        | VenueCode::ERR_NOSERVICE
        | VenueCode::AUTH_ACCOUNT_INVALID => ErrorKind::ConnectionUnavailable,
        _ => ErrorKind::RemoteFailed,
    }
}

impl VenueCode {
    /// Lift a failed call into a typed error
    pub fn into_error(self, operation: &str, login: u64) -> GatewayError {
        match classify(self) {
            ErrorKind::AccountNotFound => GatewayError::AccountNotFound { login },
            ErrorKind::PermissionDenied => GatewayError::PermissionDenied(format!(
                "{operation} on {login} rejected (code {self})"
            )),
            ErrorKind::CapacityExhausted => {
                GatewayError::CapacityExhausted(format!("{operation}: no free logins (code {self})"))
            }
            ErrorKind::DuplicateEntity => {
                GatewayError::DuplicateEntity(format!("{operation}: login {login} already exists"))
            }
            ErrorKind::InsufficientFunds => GatewayError::InsufficientFunds {
                requested: rust_decimal::Decimal::ZERO,
                available: rust_decimal::Decimal::ZERO,
            },
            ErrorKind::LimitReached => {
                GatewayError::LimitReached(format!("{operation} on {login} (code {self})"))
            }
            ErrorKind::Timeout => GatewayError::Timeout {
                operation: operation.to_string(),
                elapsed_ms: 0,
            },
            ErrorKind::ConnectionUnavailable => GatewayError::ConnectionUnavailable(format!(
                "{operation} failed with code {self}"
            )),
            _ => GatewayError::RemoteFailed {
                operation: operation.to_string(),
                code: self.0,
            },
        }
    }
}
