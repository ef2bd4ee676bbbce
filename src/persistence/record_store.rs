use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    AccountOwner, AccountRecord, AuditEntry, ConnectionSettings, DefaultSlot,
    FundOperationRecord, GroupUpsert, Login, NewConnectionSettings, SagaState, TradingGroup,
    TransferSaga,
};
use crate::error::Result;

/// Narrow record-store interface consumed by the gateway
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ==================== Accounts ====================

    async fn find_account_by_login(&self, login: Login) -> Result<Option<AccountRecord>>;

    /// Owner of the account and the owner's upstream introducing broker
    async fn find_account_owner(&self, login: Login) -> Result<Option<AccountOwner>>;

    async fn upsert_account(&self, record: &AccountRecord) -> Result<()>;

    /// Flag the mirror row inactive; returns false when no row exists
    async fn mark_account_inactive(&self, login: Login) -> Result<bool>;

    async fn update_account_balance(&self, login: Login, balance: Decimal) -> Result<()>;

    // ==================== Trading groups ====================

    async fn upsert_trading_group(&self, upsert: &GroupUpsert) -> Result<()>;

    /// Deactivate every active group whose name is not in `keep`
    async fn deactivate_groups_except(
        &self,
        keep: &[String],
        synced_at: DateTime<Utc>,
    ) -> Result<u64>;

    async fn list_trading_groups(&self, active_only: bool) -> Result<Vec<TradingGroup>>;

    /// Move a default designation to `name`, clearing it everywhere else atomically
    async fn set_default_group(&self, name: &str, slot: DefaultSlot) -> Result<()>;

    async fn set_group_alias(&self, name: &str, alias: Option<&str>) -> Result<()>;

    // ==================== Fund operations ====================

    async fn create_fund_operation_record(&self, record: &FundOperationRecord) -> Result<()>;

    async fn list_fund_operations(&self, login: Login) -> Result<Vec<FundOperationRecord>>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    async fn create_transfer_saga(&self, saga: &TransferSaga) -> Result<()>;

    async fn update_transfer_saga(
        &self,
        id: Uuid,
        state: SagaState,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Sagas that stopped before a terminal state
    async fn pending_transfer_sagas(&self) -> Result<Vec<TransferSaga>>;

    // ==================== Connection settings ====================

    /// Append a settings row; history is never mutated
    async fn insert_connection_settings(
        &self,
        new: &NewConnectionSettings,
    ) -> Result<ConnectionSettings>;
}

/// Where the connection manager reads credentials from
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Newest settings row by creation time, if any
    async fn latest_settings(&self) -> Result<Option<ConnectionSettings>>;
}
