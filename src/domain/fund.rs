use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Login;

/// Venue balance-adjustment discriminator (DealerBalance operation type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceOperation {
    Balance,
    Credit,
    Bonus,
}

impl BalanceOperation {
    /// Vendor deal type code for the adjustment
    pub fn code(&self) -> u32 {
        match self {
            Self::Balance => 2,
            Self::Credit => 3,
            Self::Bonus => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundOperationKind {
    Deposit,
    Withdraw,
    CreditIn,
    CreditOut,
    BonusIn,
    BonusOut,
    Transfer,
}

impl FundOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::CreditIn => "credit_in",
            Self::CreditOut => "credit_out",
            Self::BonusIn => "bonus_in",
            Self::BonusOut => "bonus_out",
            Self::Transfer => "transfer",
        }
    }

    /// Adjustment type sent to the venue; transfers are two balance calls
    pub fn balance_operation(&self) -> BalanceOperation {
        match self {
            Self::Deposit | Self::Withdraw | Self::Transfer => BalanceOperation::Balance,
            Self::CreditIn | Self::CreditOut => BalanceOperation::Credit,
            Self::BonusIn | Self::BonusOut => BalanceOperation::Bonus,
        }
    }

    /// Money leaving the account
    pub fn is_outflow(&self) -> bool {
        matches!(self, Self::Withdraw | Self::CreditOut | Self::BonusOut)
    }

    /// Apply the direction of the operation to a positive amount
    pub fn signed(&self, amount: Decimal) -> Decimal {
        if self.is_outflow() {
            -amount
        } else {
            amount
        }
    }
}

impl std::fmt::Display for FundOperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FundOperationKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "deposit" => Ok(Self::Deposit),
            "withdraw" | "withdrawal" => Ok(Self::Withdraw),
            "credit_in" => Ok(Self::CreditIn),
            "credit_out" => Ok(Self::CreditOut),
            "bonus_in" => Ok(Self::BonusIn),
            "bonus_out" => Ok(Self::BonusOut),
            "transfer" => Ok(Self::Transfer),
            other => Err(format!("unknown fund operation: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundStatus {
    Approved,
    Rejected,
}

impl FundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Lifecycle of a single fund operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FundOpState {
    Requested,
    Validated,
    RemoteExecuting,
    Confirmed,
    RemoteFailed,
}

impl FundOpState {
    pub fn can_transition_to(&self, next: FundOpState) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Validated)
                | (Self::Validated, Self::RemoteExecuting)
                | (Self::RemoteExecuting, Self::Confirmed)
                | (Self::RemoteExecuting, Self::RemoteFailed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::RemoteFailed)
    }
}

/// A caller's request to move money
#[derive(Debug, Clone)]
pub struct FundRequest {
    pub kind: FundOperationKind,
    pub login: Login,
    /// Positive magnitude; direction comes from `kind`
    pub amount: Decimal,
    pub comment: String,
    pub actor: String,
    /// Account reference the caller believes it is operating on
    pub expected_owner: Option<i64>,
}

/// Internal move between two accounts of the same client
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from_login: Login,
    pub to_login: Login,
    pub amount: Decimal,
    pub comment: String,
    pub actor: String,
    pub expected_owner: Option<i64>,
}

/// Durable record of a confirmed (or explicit fallback) fund operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundOperationRecord {
    pub id: Uuid,
    pub kind: FundOperationKind,
    pub login: Login,
    /// Signed amount as applied to the account
    pub amount: Decimal,
    pub comment: String,
    pub status: FundStatus,
    pub actor: String,
    /// Set when the venue was not involved
    pub fallback: bool,
    pub venue_deal_id: Option<u64>,
    pub balance_after: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    Started,
    /// Source debit refused; nothing moved
    Aborted,
    /// Source debit timed out and may still be applied by the venue
    DebitUnconfirmed,
    SourceDebited,
    /// Destination credit timed out; not reversed
    CreditUnconfirmed,
    Completed,
    Compensated,
    /// Reversal of the source debit timed out
    ReversalUnconfirmed,
    CompensationFailed,
}

impl SagaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Aborted => "aborted",
            Self::DebitUnconfirmed => "debit_unconfirmed",
            Self::SourceDebited => "source_debited",
            Self::CreditUnconfirmed => "credit_unconfirmed",
            Self::Completed => "completed",
            Self::Compensated => "compensated",
            Self::ReversalUnconfirmed => "reversal_unconfirmed",
            Self::CompensationFailed => "compensation_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Completed | Self::Compensated)
    }

    /// An operator has to check the venue before anything else moves
    pub fn needs_reconciliation(&self) -> bool {
        matches!(
            self,
            Self::DebitUnconfirmed
                | Self::CreditUnconfirmed
                | Self::ReversalUnconfirmed
                | Self::CompensationFailed
        )
    }
}

impl TryFrom<&str> for SagaState {
    type Error = String;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        match raw {
            "started" => Ok(Self::Started),
            "aborted" => Ok(Self::Aborted),
            "debit_unconfirmed" => Ok(Self::DebitUnconfirmed),
            "source_debited" => Ok(Self::SourceDebited),
            "credit_unconfirmed" => Ok(Self::CreditUnconfirmed),
            "completed" => Ok(Self::Completed),
            "compensated" => Ok(Self::Compensated),
            "reversal_unconfirmed" => Ok(Self::ReversalUnconfirmed),
            "compensation_failed" => Ok(Self::CompensationFailed),
            other => Err(format!("unknown saga state: {other}")),
        }
    }
}

/// Persisted two-step internal transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSaga {
    pub id: Uuid,
    pub from_login: Login,
    pub to_login: Login,
    pub amount: Decimal,
    pub state: SagaState,
    pub actor: String,
    pub comment: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit log line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub target: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor: &str, action: &str, target: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            actor: actor.to_string(),
            action: action.to_string(),
            target: target.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn outflows_are_negative() {
        assert_eq!(FundOperationKind::Withdraw.signed(dec!(10)), dec!(-10));
        assert_eq!(FundOperationKind::BonusOut.signed(dec!(10)), dec!(-10));
        assert_eq!(FundOperationKind::CreditIn.signed(dec!(10)), dec!(10));
    }

    #[test]
    fn kind_selects_venue_adjustment() {
        assert_eq!(
            FundOperationKind::CreditOut.balance_operation(),
            BalanceOperation::Credit
        );
        assert_eq!(FundOperationKind::BonusIn.balance_operation().code(), 6);
        assert_eq!(FundOperationKind::Deposit.balance_operation().code(), 2);
    }

    #[test]
    fn state_machine_only_moves_forward() {
        use FundOpState::*;
        assert!(Requested.can_transition_to(Validated));
        assert!(RemoteExecuting.can_transition_to(RemoteFailed));
        assert!(!Requested.can_transition_to(RemoteExecuting));
        assert!(!Confirmed.can_transition_to(RemoteFailed));
        assert!(RemoteFailed.is_terminal());
    }

    #[test]
    fn kind_parses_path_segments() {
        assert_eq!("credit-in".parse(), Ok(FundOperationKind::CreditIn));
        assert_eq!("withdrawal".parse(), Ok(FundOperationKind::Withdraw));
        assert!("refund".parse::<FundOperationKind>().is_err());
    }

    #[test]
    fn unconfirmed_sagas_stay_open() {
        for state in [
            SagaState::DebitUnconfirmed,
            SagaState::CreditUnconfirmed,
            SagaState::ReversalUnconfirmed,
        ] {
            assert!(!state.is_terminal());
            assert!(state.needs_reconciliation());
            assert_eq!(SagaState::try_from(state.as_str()), Ok(state));
        }
        assert!(!SagaState::Aborted.needs_reconciliation());
        assert!(!SagaState::SourceDebited.needs_reconciliation());
    }
}
