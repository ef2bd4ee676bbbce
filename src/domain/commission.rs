use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{Login, TradeSide};

/// Venue notification that a position was closed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionClosedEvent {
    pub login: Login,
    pub position_id: u64,
    pub action: String,
    pub entry_type: String,
    pub symbol: String,
    pub side: Option<TradeSide>,
    pub lot_size: Decimal,
    pub profit: Decimal,
    pub commission: Decimal,
    pub deal_ticket: Option<u64>,
    pub close_time: Option<DateTime<Utc>>,
}

/// Who a closed position is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommissionAttribution {
    pub client_user_id: i64,
    pub ib_user_id: i64,
}

/// Outcome of feeding one event into the commission ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommissionOutcome {
    /// The ledger creator produced this many entries
    Recorded { entries: usize },
    /// Owner has no upstream IB; accepted without a ledger entry
    NoUpstreamBroker,
}
