use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::secrets::SecretString;

/// Venue login id
pub type Login = u64;

/// Parse a caller-supplied login. Non-numeric or zero ids never reach the venue.
pub fn parse_login(raw: &str) -> Option<Login> {
    raw.trim().parse::<Login>().ok().filter(|login| *login > 0)
}

/// Vendor account capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountRights(u64);

impl AccountRights {
    pub const NONE: Self = Self(0);
    pub const ENABLED: Self = Self(0x0001);
    pub const PASSWORD_CHANGE: Self = Self(0x0002);
    pub const TRADE_DISABLED: Self = Self(0x0004);
    pub const INVESTOR: Self = Self(0x0008);
    pub const CONFIRMED: Self = Self(0x0010);
    pub const TRAILING: Self = Self(0x0020);
    pub const EXPERT: Self = Self(0x0040);
    pub const REPORTS: Self = Self(0x0100);
    pub const READONLY: Self = Self(0x0200);
    pub const RESET_PASSWORD: Self = Self(0x0400);
    pub const OTP_ENABLED: Self = Self(0x0800);

    /// Rights given to freshly created accounts
    pub const DEFAULT_NEW: Self =
        Self(Self::ENABLED.0 | Self::PASSWORD_CHANGE.0 | Self::TRAILING.0 | Self::EXPERT.0 | Self::REPORTS.0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn set(&mut self, flag: Self, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.contains(Self::ENABLED)
    }

    /// The vendor stores this inverted
    pub fn trading_allowed(&self) -> bool {
        !self.contains(Self::TRADE_DISABLED)
    }

    pub fn algo_trading_allowed(&self) -> bool {
        self.contains(Self::EXPERT)
    }
}

impl std::ops::BitOr for AccountRights {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Named toggles accepted by the rights-change operation
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RightsChange {
    pub enabled: Option<bool>,
    pub password_change: Option<bool>,
    pub trading: Option<bool>,
    pub algo_trading: Option<bool>,
    pub reports: Option<bool>,
}

impl RightsChange {
    pub fn apply(&self, mut rights: AccountRights) -> AccountRights {
        if let Some(on) = self.enabled {
            rights.set(AccountRights::ENABLED, on);
        }
        if let Some(on) = self.password_change {
            rights.set(AccountRights::PASSWORD_CHANGE, on);
        }
        if let Some(on) = self.trading {
            rights.set(AccountRights::TRADE_DISABLED, !on);
        }
        if let Some(on) = self.algo_trading {
            rights.set(AccountRights::EXPERT, on);
        }
        if let Some(on) = self.reports {
            rights.set(AccountRights::REPORTS, on);
        }
        rights
    }
}

/// Venue-side user record (UserGet / UserUpdate payload)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueUser {
    pub login: Login,
    pub name: String,
    pub group: String,
    pub leverage: u32,
    pub rights: AccountRights,
    pub email: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
}

/// Trade-account figures (UserAccountGet)
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AccountFigures {
    pub login: Login,
    pub balance: Decimal,
    pub credit: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub margin_free: Decimal,
    pub margin_level: Decimal,
}

impl AccountFigures {
    pub fn empty(login: Login) -> Self {
        Self {
            login,
            ..Default::default()
        }
    }

    /// Floating result of open positions
    pub fn profit(&self) -> Decimal {
        self.equity - self.balance - self.credit
    }
}

/// Combined view returned by the account summary operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub login: Login,
    pub balance: Decimal,
    pub credit: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub margin_free: Decimal,
    pub margin_level: Decimal,
    pub profit: Decimal,
    pub leverage: u32,
    pub group: Option<String>,
    pub rights: AccountRights,
    /// False when the venue had nothing for this login
    pub found: bool,
}

impl AccountSummary {
    pub fn missing(login: Login) -> Self {
        Self {
            login,
            balance: Decimal::ZERO,
            credit: Decimal::ZERO,
            equity: Decimal::ZERO,
            margin: Decimal::ZERO,
            margin_free: Decimal::ZERO,
            margin_level: Decimal::ZERO,
            profit: Decimal::ZERO,
            leverage: 0,
            group: None,
            rights: AccountRights::NONE,
            found: false,
        }
    }
}

/// Locally mirrored account row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountRecord {
    pub login: Login,
    pub owner_user_id: i64,
    pub balance: Decimal,
    pub group_name: Option<String>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Owner of a local account and the IB that referred them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountOwner {
    pub user_id: i64,
    pub upstream_ib_id: Option<i64>,
}

/// Request to open a new venue account
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// 0 lets the venue assign the next free login
    pub login: Login,
    pub name: String,
    pub group: String,
    pub leverage: u32,
    pub rights: AccountRights,
    pub email: Option<String>,
    pub main_password: SecretString,
    pub investor_password: SecretString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordKind {
    Main,
    Investor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl TryFrom<&str> for TradeSide {
    type Error = String;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "0" => Ok(Self::Buy),
            "sell" | "1" => Ok(Self::Sell),
            other => Err(format!("unknown trade side: {other}")),
        }
    }
}

/// Open position (PositionGet)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub position_id: u64,
    pub login: Login,
    pub symbol: String,
    pub side: TradeSide,
    pub volume: Decimal,
    pub open_price: Decimal,
    pub current_price: Decimal,
    pub profit: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Vendor deal type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DealKind {
    Buy,
    Sell,
    Balance,
    Credit,
    Charge,
    Correction,
    Bonus,
    Commission,
    Other(u32),
}

impl DealKind {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Buy,
            1 => Self::Sell,
            2 => Self::Balance,
            3 => Self::Credit,
            4 => Self::Charge,
            5 => Self::Correction,
            6 => Self::Bonus,
            7 => Self::Commission,
            other => Self::Other(other),
        }
    }

    pub fn is_trade(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

/// Historical ledger event (DealRequest)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deal {
    pub deal_id: u64,
    pub login: Login,
    pub time: DateTime<Utc>,
    pub kind: DealKind,
    pub symbol: Option<String>,
    pub volume: Decimal,
    pub price: Decimal,
    pub profit: Decimal,
    pub commission: Decimal,
    pub comment: String,
}
