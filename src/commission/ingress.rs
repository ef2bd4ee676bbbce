//! Position-closed webhook ingestion
//!
//! Converts a venue "position closed" notification into commission ledger
//! entries for the client's upstream introducing broker. The percentage math
//! lives behind [`LedgerEntryCreator`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::domain::{
    parse_login, CommissionAttribution, CommissionOutcome, PositionClosedEvent, TradeSide,
};
use crate::error::{GatewayError, Result};
use crate::persistence::RecordStore;

/// Creates IB commission ledger entries for a closed position
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerEntryCreator: Send + Sync {
    /// Returns the number of entries written
    async fn create_entries(
        &self,
        event: &PositionClosedEvent,
        attribution: &CommissionAttribution,
    ) -> Result<usize>;
}

/// Ledger creator that only logs; used when no ledger backend is wired
#[derive(Debug, Default, Clone)]
pub struct LoggingLedger;

#[async_trait]
impl LedgerEntryCreator for LoggingLedger {
    async fn create_entries(
        &self,
        event: &PositionClosedEvent,
        attribution: &CommissionAttribution,
    ) -> Result<usize> {
        info!(
            "Commission {} on position {} attributed to IB {}",
            event.commission, event.position_id, attribution.ib_user_id
        );
        Ok(1)
    }
}

/// Raw webhook body. Every field is optional here so that missing fields map
/// to a 400 listing them, and numbers may arrive as JSON strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionClosedPayload {
    pub login_id: Option<Value>,
    pub position_id: Option<Value>,
    pub action: Option<Value>,
    pub entry_type: Option<Value>,
    pub symbol: Option<String>,
    pub commission: Option<Value>,
    pub lot_size: Option<Value>,
    pub profit: Option<Value>,
    pub deal_ticket: Option<Value>,
    pub mt5_close_time: Option<Value>,
}

const REQUIRED_FIELDS: &[&str] = &[
    "login_id",
    "position_id",
    "action",
    "entry_type",
    "symbol",
    "commission",
    "lot_size",
    "profit",
];

impl PositionClosedPayload {
    fn is_present(&self, name: &str) -> bool {
        let value = match name {
            "login_id" => self.login_id.as_ref(),
            "position_id" => self.position_id.as_ref(),
            "action" => self.action.as_ref(),
            "entry_type" => self.entry_type.as_ref(),
            "commission" => self.commission.as_ref(),
            "lot_size" => self.lot_size.as_ref(),
            "profit" => self.profit.as_ref(),
            "symbol" => {
                return self.symbol.as_deref().is_some_and(|s| !s.trim().is_empty());
            }
            _ => None,
        };
        value.is_some_and(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty()))
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|name| !self.is_present(name))
            .collect()
    }

    /// Validate and convert into a typed event
    pub fn into_event(self) -> Result<PositionClosedEvent> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(GatewayError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let login = self
            .login_id
            .as_ref()
            .and_then(value_text)
            .and_then(|raw| parse_login(&raw))
            .ok_or_else(|| GatewayError::Validation("login_id must be a positive integer".into()))?;
        let position_id = self
            .position_id
            .as_ref()
            .and_then(value_u64)
            .ok_or_else(|| GatewayError::Validation("position_id must be an integer".into()))?;
        let action = self.action.as_ref().and_then(value_text).unwrap_or_default();

        Ok(PositionClosedEvent {
            login,
            position_id,
            side: TradeSide::try_from(action.as_str()).ok(),
            action,
            entry_type: self
                .entry_type
                .as_ref()
                .and_then(value_text)
                .unwrap_or_default(),
            symbol: self.symbol.unwrap_or_default().trim().to_string(),
            lot_size: decimal_field(self.lot_size.as_ref(), "lot_size")?,
            profit: decimal_field(self.profit.as_ref(), "profit")?,
            commission: decimal_field(self.commission.as_ref(), "commission")?,
            deal_ticket: self.deal_ticket.as_ref().and_then(value_u64),
            close_time: self.mt5_close_time.as_ref().and_then(value_time),
        })
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decimal_field(value: Option<&Value>, name: &str) -> Result<Decimal> {
    value
        .and_then(value_text)
        .and_then(|raw| Decimal::from_str(&raw).ok())
        .ok_or_else(|| GatewayError::Validation(format!("{name} must be a number")))
}

/// Unix seconds or RFC 3339
fn value_time(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_i64() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    let raw = value.as_str()?.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Response body of an accepted event
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub login: u64,
    pub position_id: u64,
    #[serde(flatten)]
    pub outcome: CommissionOutcome,
    pub processing_ms: f64,
}

#[derive(Clone)]
pub struct CommissionIngress {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerEntryCreator>,
}

impl CommissionIngress {
    pub fn new(store: Arc<dyn RecordStore>, ledger: Arc<dyn LedgerEntryCreator>) -> Self {
        Self { store, ledger }
    }

    /// Validation failures are `Validation`; unknown accounts are `AccountNotFound`
    #[instrument(skip(self, payload))]
    pub async fn ingest(&self, payload: PositionClosedPayload) -> Result<IngestReceipt> {
        let started = Instant::now();
        let event = payload.into_event()?;

        let owner = self
            .store
            .find_account_owner(event.login)
            .await?
            .ok_or(GatewayError::AccountNotFound { login: event.login })?;

        let outcome = match owner.upstream_ib_id {
            None => CommissionOutcome::NoUpstreamBroker,
            Some(ib_user_id) => {
                let attribution = CommissionAttribution {
                    client_user_id: owner.user_id,
                    ib_user_id,
                };
                let entries = self.ledger.create_entries(&event, &attribution).await?;
                CommissionOutcome::Recorded { entries }
            }
        };

        let processing_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &outcome {
            CommissionOutcome::Recorded { entries } => info!(
                "Position {} on {} closed: {} commission entries in {:.2}ms",
                event.position_id, event.login, entries, processing_ms
            ),
            CommissionOutcome::NoUpstreamBroker => info!(
                "Position {} on {} closed: no upstream IB ({:.2}ms)",
                event.position_id, event.login, processing_ms
            ),
        }
        if processing_ms > 50.0 {
            warn!(
                "Commission webhook for position {} took {:.2}ms",
                event.position_id, processing_ms
            );
        }

        Ok(IngestReceipt {
            login: event.login,
            position_id: event.position_id,
            outcome,
            processing_ms,
        })
    }
}
