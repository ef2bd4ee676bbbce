use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    AccountOwner, AccountRecord, AuditEntry, ConnectionSettings, DefaultSlot,
    FundOperationKind, FundOperationRecord, FundStatus, GroupKind, GroupUpsert, Login,
    NewConnectionSettings, SagaState, TradingGroup, TransferSaga,
};
use crate::error::{GatewayError, Result};
use crate::persistence::{RecordStore, SettingsSource};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

fn db_login(login: Login) -> Result<i64> {
    i64::try_from(login)
        .map_err(|_| GatewayError::Validation(format!("login {login} out of range")))
}

fn row_login(row: &PgRow, column: &str) -> Login {
    row.get::<i64, _>(column) as Login
}

fn account_from_row(row: &PgRow) -> AccountRecord {
    AccountRecord {
        login: row_login(row, "login"),
        owner_user_id: row.get("owner_user_id"),
        balance: row.get("balance"),
        group_name: row.get("group_name"),
        active: row.get("active"),
        updated_at: row.get("updated_at"),
    }
}

fn group_from_row(row: &PgRow) -> Result<TradingGroup> {
    let kind: String = row.get("kind");
    Ok(TradingGroup {
        name: row.get("name"),
        kind: GroupKind::try_from(kind.as_str()).map_err(GatewayError::Internal)?,
        active: row.get("active"),
        alias: row.get("alias"),
        currency: row.get("currency"),
        is_default: row.get("is_default"),
        is_demo_default: row.get("is_demo_default"),
        last_sync_at: row.get("last_sync_at"),
    })
}

fn fund_operation_from_row(row: &PgRow) -> Result<FundOperationRecord> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Ok(FundOperationRecord {
        id: row.get("id"),
        kind: kind.parse::<FundOperationKind>().map_err(GatewayError::Internal)?,
        login: row_login(row, "login"),
        amount: row.get("amount"),
        comment: row.get("comment"),
        status: match status.as_str() {
            "approved" => FundStatus::Approved,
            "rejected" => FundStatus::Rejected,
            other => return Err(GatewayError::Internal(format!("unknown fund status: {other}"))),
        },
        actor: row.get("actor"),
        fallback: row.get("fallback"),
        venue_deal_id: row
            .get::<Option<i64>, _>("venue_deal_id")
            .map(|id| id as u64),
        balance_after: row.get("balance_after"),
        created_at: row.get("created_at"),
    })
}

fn saga_from_row(row: &PgRow) -> Result<TransferSaga> {
    let state: String = row.get("state");
    Ok(TransferSaga {
        id: row.get("id"),
        from_login: row_login(row, "from_login"),
        to_login: row_login(row, "to_login"),
        amount: row.get("amount"),
        state: SagaState::try_from(state.as_str()).map_err(GatewayError::Internal)?,
        actor: row.get("actor"),
        comment: row.get("comment"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn settings_from_row(row: &PgRow) -> ConnectionSettings {
    ConnectionSettings {
        id: row.get("id"),
        server_address: row.get("server_address"),
        login: row_login(row, "login"),
        secret_hash: row.get("secret_hash"),
        secret_reversible: row.get("secret_reversible"),
        display_name: row.get("display_name"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    // ==================== Accounts ====================

    #[instrument(skip(self))]
    async fn find_account_by_login(&self, login: Login) -> Result<Option<AccountRecord>> {
        let row = sqlx::query(
            r#"
            SELECT login, owner_user_id, balance, group_name, active, updated_at
            FROM trading_accounts
            WHERE login = $1
            "#,
        )
        .bind(db_login(login)?)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(account_from_row))
    }

    #[instrument(skip(self))]
    async fn find_account_owner(&self, login: Login) -> Result<Option<AccountOwner>> {
        let row = sqlx::query(
            r#"
            SELECT a.owner_user_id, u.upstream_ib_id
            FROM trading_accounts a
            LEFT JOIN users u ON u.id = a.owner_user_id
            WHERE a.login = $1
            "#,
        )
        .bind(db_login(login)?)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| AccountOwner {
            user_id: r.get("owner_user_id"),
            upstream_ib_id: r.get("upstream_ib_id"),
        }))
    }

    #[instrument(skip(self, record), fields(login = record.login))]
    async fn upsert_account(&self, record: &AccountRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_accounts (login, owner_user_id, balance, group_name, active, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (login) DO UPDATE SET
                owner_user_id = EXCLUDED.owner_user_id,
                balance = EXCLUDED.balance,
                group_name = EXCLUDED.group_name,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(db_login(record.login)?)
        .bind(record.owner_user_id)
        .bind(record.balance)
        .bind(&record.group_name)
        .bind(record.active)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_account_inactive(&self, login: Login) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trading_accounts
            SET active = FALSE, updated_at = NOW()
            WHERE login = $1 AND active
            "#,
        )
        .bind(db_login(login)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn update_account_balance(&self, login: Login, balance: Decimal) -> Result<()> {
        let result = sqlx::query(
            "UPDATE trading_accounts SET balance = $2, updated_at = NOW() WHERE login = $1",
        )
        .bind(db_login(login)?)
        .bind(balance)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("account {login}")));
        }
        Ok(())
    }

    // ==================== Trading groups ====================

    #[instrument(skip(self, upsert), fields(name = %upsert.name))]
    async fn upsert_trading_group(&self, upsert: &GroupUpsert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_groups (name, kind, active, currency, last_sync_at)
            VALUES ($1, $2, TRUE, $3, $4)
            ON CONFLICT (name) DO UPDATE SET
                kind = EXCLUDED.kind,
                active = TRUE,
                currency = EXCLUDED.currency,
                last_sync_at = EXCLUDED.last_sync_at
            "#,
        )
        .bind(&upsert.name)
        .bind(upsert.kind.as_str())
        .bind(&upsert.currency)
        .bind(upsert.synced_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, keep), fields(keep = keep.len()))]
    async fn deactivate_groups_except(
        &self,
        keep: &[String],
        synced_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE trading_groups
            SET active = FALSE, is_default = FALSE, is_demo_default = FALSE, last_sync_at = $2
            WHERE active AND NOT (name = ANY($1))
            "#,
        )
        .bind(keep)
        .bind(synced_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_trading_groups(&self, active_only: bool) -> Result<Vec<TradingGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT name, kind, active, alias, currency, is_default, is_demo_default, last_sync_at
            FROM trading_groups
            WHERE active OR NOT $1
            ORDER BY name
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(group_from_row).collect()
    }

    /// Clear-then-set in one transaction so the partial unique index holds
    #[instrument(skip(self))]
    async fn set_default_group(&self, name: &str, slot: DefaultSlot) -> Result<()> {
        let column = match slot {
            DefaultSlot::Live => "is_default",
            DefaultSlot::Demo => "is_demo_default",
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "UPDATE trading_groups SET {column} = FALSE WHERE {column} AND name <> $1"
        ))
        .bind(name)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(&format!(
            "UPDATE trading_groups SET {column} = TRUE WHERE name = $1"
        ))
        .bind(name)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(GatewayError::NotFound(format!("trading group {name}")));
        }
        tx.commit().await?;
        debug!("Moved {} to {}", column, name);
        Ok(())
    }

    async fn set_group_alias(&self, name: &str, alias: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE trading_groups SET alias = $2 WHERE name = $1")
            .bind(name)
            .bind(alias)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("trading group {name}")));
        }
        Ok(())
    }

    // ==================== Fund operations ====================

    #[instrument(skip(self, record), fields(id = %record.id, kind = %record.kind))]
    async fn create_fund_operation_record(&self, record: &FundOperationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fund_operations
                (id, kind, login, amount, comment, status, actor, fallback, venue_deal_id, balance_after, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.kind.as_str())
        .bind(db_login(record.login)?)
        .bind(record.amount)
        .bind(&record.comment)
        .bind(record.status.as_str())
        .bind(&record.actor)
        .bind(record.fallback)
        .bind(record.venue_deal_id.map(|id| id as i64))
        .bind(record.balance_after)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_fund_operations(&self, login: Login) -> Result<Vec<FundOperationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, login, amount, comment, status, actor, fallback,
                   venue_deal_id, balance_after, created_at
            FROM fund_operations
            WHERE login = $1
            ORDER BY created_at
            "#,
        )
        .bind(db_login(login)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(fund_operation_from_row).collect()
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor, action, target, details, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.target)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Transfer sagas ====================

    #[instrument(skip(self, saga), fields(id = %saga.id))]
    async fn create_transfer_saga(&self, saga: &TransferSaga) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer_sagas
                (id, from_login, to_login, amount, state, actor, comment, last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(saga.id)
        .bind(db_login(saga.from_login)?)
        .bind(db_login(saga.to_login)?)
        .bind(saga.amount)
        .bind(saga.state.as_str())
        .bind(&saga.actor)
        .bind(&saga.comment)
        .bind(&saga.last_error)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_transfer_saga(
        &self,
        id: Uuid,
        state: SagaState,
        last_error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_sagas
            SET state = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(state.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("transfer saga {id}")));
        }
        Ok(())
    }

    async fn pending_transfer_sagas(&self) -> Result<Vec<TransferSaga>> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_login, to_login, amount, state, actor, comment, last_error,
                   created_at, updated_at
            FROM transfer_sagas
            WHERE state NOT IN ('aborted', 'completed', 'compensated')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(saga_from_row).collect()
    }

    // ==================== Connection settings ====================

    #[instrument(skip(self, new), fields(server = %new.server_address))]
    async fn insert_connection_settings(
        &self,
        new: &NewConnectionSettings,
    ) -> Result<ConnectionSettings> {
        let row = sqlx::query(
            r#"
            INSERT INTO connection_settings
                (server_address, login, secret_hash, secret_reversible, display_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, server_address, login, secret_hash, secret_reversible, display_name, created_at
            "#,
        )
        .bind(&new.server_address)
        .bind(db_login(new.login)?)
        .bind(&new.secret_hash)
        .bind(&new.secret_reversible)
        .bind(&new.display_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(settings_from_row(&row))
    }
}

#[async_trait]
impl SettingsSource for PostgresStore {
    async fn latest_settings(&self) -> Result<Option<ConnectionSettings>> {
        let row = sqlx::query(
            r#"
            SELECT id, server_address, login, secret_hash, secret_reversible, display_name, created_at
            FROM connection_settings
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(settings_from_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logins_beyond_bigint_are_rejected() {
        assert_eq!(db_login(12345).unwrap(), 12345);
        assert!(matches!(
            db_login(u64::MAX),
            Err(GatewayError::Validation(_))
        ));
    }
}
