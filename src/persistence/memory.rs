//! In-memory record store for offline runs and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RecordStore, SettingsSource};
use crate::domain::{
    AccountOwner, AccountRecord, AuditEntry, ConnectionSettings, DefaultSlot,
    FundOperationRecord, GroupUpsert, Login, NewConnectionSettings, SagaState, TradingGroup,
    TransferSaga,
};
use crate::error::{GatewayError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Login, AccountRecord>,
    /// user id -> upstream IB user id
    referrers: HashMap<i64, Option<i64>>,
    groups: BTreeMap<String, TradingGroup>,
    fund_operations: Vec<FundOperationRecord>,
    audit: Vec<AuditEntry>,
    sagas: BTreeMap<Uuid, TransferSaga>,
    settings: Vec<ConnectionSettings>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and the IB that referred them
    pub async fn set_referrer(&self, user_id: i64, upstream_ib_id: Option<i64>) {
        self.state
            .write()
            .await
            .referrers
            .insert(user_id, upstream_ib_id);
    }

    pub async fn fund_operations(&self) -> Vec<FundOperationRecord> {
        self.state.read().await.fund_operations.clone()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.clone()
    }

    pub async fn sagas(&self) -> Vec<TransferSaga> {
        self.state.read().await.sagas.values().cloned().collect()
    }

    pub async fn group(&self, name: &str) -> Option<TradingGroup> {
        self.state.read().await.groups.get(name).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_account_by_login(&self, login: Login) -> Result<Option<AccountRecord>> {
        Ok(self.state.read().await.accounts.get(&login).cloned())
    }

    async fn find_account_owner(&self, login: Login) -> Result<Option<AccountOwner>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&login).map(|account| AccountOwner {
            user_id: account.owner_user_id,
            upstream_ib_id: state
                .referrers
                .get(&account.owner_user_id)
                .copied()
                .flatten(),
        }))
    }

    async fn upsert_account(&self, record: &AccountRecord) -> Result<()> {
        self.state
            .write()
            .await
            .accounts
            .insert(record.login, record.clone());
        Ok(())
    }

    async fn mark_account_inactive(&self, login: Login) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.accounts.get_mut(&login) {
            Some(account) => {
                account.active = false;
                account.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_account_balance(&self, login: Login, balance: Decimal) -> Result<()> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&login)
            .ok_or_else(|| GatewayError::NotFound(format!("account {login}")))?;
        account.balance = balance;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_trading_group(&self, upsert: &GroupUpsert) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .groups
            .entry(upsert.name.clone())
            .and_modify(|group| {
                group.kind = upsert.kind;
                group.currency = upsert.currency.clone();
                group.active = true;
                group.last_sync_at = Some(upsert.synced_at);
            })
            .or_insert_with(|| TradingGroup {
                name: upsert.name.clone(),
                kind: upsert.kind,
                active: true,
                alias: None,
                currency: upsert.currency.clone(),
                is_default: false,
                is_demo_default: false,
                last_sync_at: Some(upsert.synced_at),
            });
        Ok(())
    }

    async fn deactivate_groups_except(
        &self,
        keep: &[String],
        synced_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut deactivated = 0;
        for group in state.groups.values_mut() {
            if group.active && !keep.iter().any(|name| name == &group.name) {
                group.active = false;
                group.is_default = false;
                group.is_demo_default = false;
                group.last_sync_at = Some(synced_at);
                deactivated += 1;
            }
        }
        Ok(deactivated)
    }

    async fn list_trading_groups(&self, active_only: bool) -> Result<Vec<TradingGroup>> {
        Ok(self
            .state
            .read()
            .await
            .groups
            .values()
            .filter(|g| !active_only || g.active)
            .cloned()
            .collect())
    }

    async fn set_default_group(&self, name: &str, slot: DefaultSlot) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(name) {
            return Err(GatewayError::NotFound(format!("trading group {name}")));
        }
        for group in state.groups.values_mut() {
            let on = group.name == name;
            match slot {
                DefaultSlot::Live => group.is_default = on,
                DefaultSlot::Demo => group.is_demo_default = on,
            }
        }
        Ok(())
    }

    async fn set_group_alias(&self, name: &str, alias: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| GatewayError::NotFound(format!("trading group {name}")))?;
        group.alias = alias.map(str::to_string);
        Ok(())
    }

    async fn create_fund_operation_record(&self, record: &FundOperationRecord) -> Result<()> {
        self.state
            .write()
            .await
            .fund_operations
            .push(record.clone());
        Ok(())
    }

    async fn list_fund_operations(&self, login: Login) -> Result<Vec<FundOperationRecord>> {
        Ok(self
            .state
            .read()
            .await
            .fund_operations
            .iter()
            .filter(|r| r.login == login)
            .cloned()
            .collect())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.state.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn create_transfer_saga(&self, saga: &TransferSaga) -> Result<()> {
        self.state
            .write()
            .await
            .sagas
            .insert(saga.id, saga.clone());
        Ok(())
    }

    async fn update_transfer_saga(
        &self,
        id: Uuid,
        state: SagaState,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut guard = self.state.write().await;
        let saga = guard
            .sagas
            .get_mut(&id)
            .ok_or_else(|| GatewayError::NotFound(format!("transfer saga {id}")))?;
        saga.state = state;
        saga.last_error = last_error.map(str::to_string);
        saga.updated_at = Utc::now();
        Ok(())
    }

    async fn pending_transfer_sagas(&self) -> Result<Vec<TransferSaga>> {
        Ok(self
            .state
            .read()
            .await
            .sagas
            .values()
            .filter(|s| !s.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn insert_connection_settings(
        &self,
        new: &NewConnectionSettings,
    ) -> Result<ConnectionSettings> {
        let mut state = self.state.write().await;
        let id = state.settings.last().map(|s| s.id + 1).unwrap_or(1);
        let row = ConnectionSettings {
            id,
            server_address: new.server_address.clone(),
            login: new.login,
            secret_hash: new.secret_hash.clone(),
            secret_reversible: new.secret_reversible.clone(),
            display_name: new.display_name.clone(),
            created_at: Utc::now(),
        };
        state.settings.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl SettingsSource for MemoryStore {
    async fn latest_settings(&self) -> Result<Option<ConnectionSettings>> {
        let state = self.state.read().await;
        Ok(state
            .settings
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GroupKind;

    fn upsert(name: &str) -> GroupUpsert {
        GroupUpsert {
            name: name.to_string(),
            kind: GroupKind::Live,
            currency: None,
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn default_flag_moves_between_groups() {
        let store = MemoryStore::new();
        for name in ["a", "b", "c"] {
            store.upsert_trading_group(&upsert(name)).await.unwrap();
        }

        store.set_default_group("a", DefaultSlot::Live).await.unwrap();
        store.set_default_group("b", DefaultSlot::Live).await.unwrap();
        store.set_default_group("c", DefaultSlot::Demo).await.unwrap();

        let groups = store.list_trading_groups(false).await.unwrap();
        let defaults: Vec<_> = groups.iter().filter(|g| g.is_default).map(|g| g.name.as_str()).collect();
        assert_eq!(defaults, vec!["b"]);
        let demo: Vec<_> = groups.iter().filter(|g| g.is_demo_default).map(|g| g.name.as_str()).collect();
        assert_eq!(demo, vec!["c"]);
    }

    #[tokio::test]
    async fn unknown_group_cannot_become_default() {
        let store = MemoryStore::new();
        let err = store.set_default_group("ghost", DefaultSlot::Live).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn latest_settings_is_newest_row() {
        let store = MemoryStore::new();
        assert!(store.latest_settings().await.unwrap().is_none());
        for address in ["first:443", "second:443"] {
            store
                .insert_connection_settings(&NewConnectionSettings {
                    server_address: address.to_string(),
                    login: 1,
                    secret_hash: String::new(),
                    secret_reversible: String::new(),
                    display_name: String::new(),
                })
                .await
                .unwrap();
        }
        let latest = store.latest_settings().await.unwrap().unwrap();
        assert_eq!(latest.server_address, "second:443");
        assert_eq!(latest.id, 2);
    }

    #[tokio::test]
    async fn owner_lookup_includes_referrer() {
        let store = MemoryStore::new();
        store
            .upsert_account(&AccountRecord {
                login: 500,
                owner_user_id: 9,
                balance: Decimal::ZERO,
                group_name: None,
                active: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        store.set_referrer(9, Some(3)).await;

        let owner = store.find_account_owner(500).await.unwrap().unwrap();
        assert_eq!(owner.user_id, 9);
        assert_eq!(owner.upstream_ib_id, Some(3));
        assert!(store.find_account_owner(501).await.unwrap().is_none());
    }
}
