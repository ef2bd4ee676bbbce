//! Typed account operations on top of the managed venue connection
//!
//! Reads treat "venue has no such account" and timeouts as an expected steady
//! state: they return a documented default, remember the miss in the
//! FailedLookupCache and mark the local mirror row inactive. Writes surface
//! every failure.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::VenueConfig;
use crate::connection::{ConnectionManager, ManagedConnection};
use crate::domain::{
    parse_login, AccountFigures, AccountRights, AccountSummary, Deal, Login, NewAccount,
    PasswordKind, Position, RightsChange, VenueUser,
};
use crate::error::{ErrorKind, GatewayError, Result};
use crate::lookup_cache::{FailedLookupCache, LookupKey};
use crate::persistence::RecordStore;
use crate::secrets::SecretString;
use crate::venue::{VenueResult, VenueSession};

/// Key used to rate-limit "account missing" diagnostics per login
const NOT_FOUND_LOG: &str = "not_found";

#[derive(Clone)]
pub struct AccountGateway {
    connections: ConnectionManager,
    lookups: FailedLookupCache,
    store: Arc<dyn RecordStore>,
    request_timeout: Duration,
    deal_range_cap: ChronoDuration,
}

impl AccountGateway {
    pub fn new(
        connections: ConnectionManager,
        lookups: FailedLookupCache,
        store: Arc<dyn RecordStore>,
        config: &VenueConfig,
    ) -> Self {
        Self {
            connections,
            lookups,
            store,
            request_timeout: config.request_timeout(),
            deal_range_cap: ChronoDuration::days(config.deal_range_cap_days.max(1)),
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn lookups(&self) -> &FailedLookupCache {
        &self.lookups
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    // ==================== Call plumbing ====================

    /// Run one blocking vendor call on the current handle
    pub(crate) async fn call<T, F>(&self, operation: &'static str, login: Login, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn VenueSession) -> VenueResult<T> + Send + 'static,
    {
        let conn = self.connections.get_connection().await?;
        self.call_on(conn, operation, login, f).await
    }

    /// Run one blocking vendor call on a handle the caller already holds.
    ///
    /// The call goes to the blocking pool and races the request timeout; on
    /// expiry the call is abandoned, not cancelled.
    pub(crate) async fn call_on<T, F>(
        &self,
        conn: Arc<ManagedConnection>,
        operation: &'static str,
        login: Login,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn VenueSession) -> VenueResult<T> + Send + 'static,
    {
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || conn.call(f));

        let joined = match tokio::time::timeout(self.request_timeout, task).await {
            Ok(joined) => joined,
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!("Venue call {} for {} timed out after {}ms", operation, login, elapsed_ms);
                return Err(GatewayError::Timeout {
                    operation: operation.to_string(),
                    elapsed_ms,
                });
            }
        };

        let outcome = joined
            .map_err(|e| GatewayError::Internal(format!("{operation} task failed: {e}")))??;
        outcome.map_err(|code| code.into_error(operation, login))
    }

    /// Read with the not-found/timeout recovery policy applied
    async fn read_or_default<T, F>(
        &self,
        data_type: &'static str,
        login: Login,
        default: T,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn VenueSession) -> VenueResult<T> + Send + 'static,
    {
        let key = LookupKey::new(login, data_type);
        if !self.lookups.should_call_vendor(&key) {
            debug!("Skipping venue {} lookup for {} (recent miss)", data_type, login);
            return Ok(default);
        }

        match self.call(data_type, login, f).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::AccountNotFound => {
                self.note_missing(login, data_type).await;
                Ok(default)
            }
            Err(e) if e.kind() == ErrorKind::Timeout => Ok(default),
            Err(e) => Err(e),
        }
    }

    /// Remember a confirmed miss and retire the local mirror row
    async fn note_missing(&self, login: Login, data_type: &'static str) {
        self.lookups.record_failure(
            &LookupKey::new(login, data_type),
            self.lookups.default_ttl(),
        );

        let log_key = LookupKey::new(login, NOT_FOUND_LOG);
        if self.lookups.should_log(&log_key) {
            warn!("Account {} not found on venue ({} lookup)", login, data_type);
        }

        match self.store.mark_account_inactive(login).await {
            Ok(true) => info!("Marked local account {} inactive", login),
            Ok(false) => {}
            Err(e) => warn!("Failed to mark account {} inactive: {}", login, e),
        }
    }

    /// Writes also learn from a confirmed miss, but still fail
    async fn write<T, F>(&self, operation: &'static str, login: Login, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn VenueSession) -> VenueResult<T> + Send + 'static,
    {
        let result = self.call(operation, login, f).await;
        if let Err(GatewayError::AccountNotFound { .. }) = &result {
            self.note_missing(login, operation).await;
        }
        result
    }

    // ==================== Reads ====================

    /// Balance, credit, equity and margin figures; zeroes when the venue has none
    #[instrument(skip(self))]
    pub async fn get_figures(&self, login: Login) -> Result<AccountFigures> {
        self.read_or_default("account", login, AccountFigures::empty(login), move |s| {
            s.user_account_get(login)
        })
        .await
    }

    pub async fn get_balance(&self, login: Login) -> Result<Decimal> {
        self.read_or_default("balance", login, Decimal::ZERO, move |s| {
            s.user_account_get(login).map(|f| f.balance)
        })
        .await
    }

    pub async fn get_equity(&self, login: Login) -> Result<Decimal> {
        self.read_or_default("equity", login, Decimal::ZERO, move |s| {
            s.user_account_get(login).map(|f| f.equity)
        })
        .await
    }

    /// Floating profit of open positions
    pub async fn get_profit(&self, login: Login) -> Result<Decimal> {
        self.read_or_default("profit", login, Decimal::ZERO, move |s| {
            s.user_account_get(login).map(|f| f.profit())
        })
        .await
    }

    pub async fn get_user(&self, login: Login) -> Result<Option<VenueUser>> {
        self.read_or_default("user", login, None, move |s| s.user_get(login).map(Some))
            .await
    }

    pub async fn get_leverage(&self, login: Login) -> Result<u32> {
        self.read_or_default("leverage", login, 0, move |s| {
            s.user_get(login).map(|u| u.leverage)
        })
        .await
    }

    pub async fn get_group(&self, login: Login) -> Result<Option<String>> {
        self.read_or_default("group", login, None, move |s| {
            s.user_get(login).map(|u| Some(u.group))
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_positions(&self, login: Login) -> Result<Vec<Position>> {
        self.read_or_default("positions", login, Vec::new(), move |s| {
            s.position_get(login)
        })
        .await
    }

    /// Historical deals for a raw account identifier.
    ///
    /// Non-numeric identifiers yield an empty list without touching the venue.
    /// The range is clamped to the configured cap, keeping the newest end.
    #[instrument(skip(self))]
    pub async fn get_deals(
        &self,
        raw_login: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deal>> {
        let Some(login) = parse_login(raw_login) else {
            debug!("Ignoring deal query for non-numeric login {:?}", raw_login);
            return Ok(Vec::new());
        };
        if from > to {
            return Ok(Vec::new());
        }
        let from = self.clamp_range(from, to);

        self.read_or_default("deals", login, Vec::new(), move |s| {
            s.deal_request(login, from, to)
        })
        .await
    }

    fn clamp_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> DateTime<Utc> {
        let earliest = to - self.deal_range_cap;
        if from < earliest {
            debug!(
                "Deal range clamped to {} days",
                self.deal_range_cap.num_days()
            );
            earliest
        } else {
            from
        }
    }

    /// Figures and user record in one round trip on the same handle
    #[instrument(skip(self))]
    pub async fn account_summary(&self, login: Login) -> Result<AccountSummary> {
        self.read_or_default("summary", login, AccountSummary::missing(login), move |s| {
            let figures = s.user_account_get(login)?;
            let user = s.user_get(login)?;
            Ok(AccountSummary {
                login,
                balance: figures.balance,
                credit: figures.credit,
                equity: figures.equity,
                margin: figures.margin,
                margin_free: figures.margin_free,
                margin_level: figures.margin_level,
                profit: figures.profit(),
                leverage: user.leverage,
                group: Some(user.group),
                rights: user.rights,
                found: true,
            })
        })
        .await
    }

    // ==================== Account lifecycle ====================

    /// Open an account on the venue and return its login
    #[instrument(skip(self, account), fields(group = %account.group))]
    pub async fn create_account(&self, account: NewAccount) -> Result<Login> {
        if account.name.trim().is_empty() {
            return Err(GatewayError::Validation("account name is required".into()));
        }
        if account.group.trim().is_empty() {
            return Err(GatewayError::Validation("group is required".into()));
        }
        if account.leverage == 0 {
            return Err(GatewayError::Validation("leverage must be positive".into()));
        }
        if account.main_password.is_empty() {
            return Err(GatewayError::Validation("main password is required".into()));
        }

        let requested = account.login;
        let login = self
            .call("user_add", requested, move |s| s.user_add(&account))
            .await?;
        info!("Created venue account {}", login);
        Ok(login)
    }

    pub async fn change_password(
        &self,
        login: Login,
        kind: PasswordKind,
        password: SecretString,
    ) -> Result<()> {
        if password.is_empty() {
            return Err(GatewayError::Validation("password must not be empty".into()));
        }
        self.write("user_password_change", login, move |s| {
            s.user_password_change(login, kind, &password)
        })
        .await?;
        info!("Changed {:?} password for {}", kind, login);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_leverage(&self, login: Login, leverage: u32) -> Result<()> {
        if leverage == 0 {
            return Err(GatewayError::Validation("leverage must be positive".into()));
        }
        self.write("user_update", login, move |s| {
            let mut user = s.user_get(login)?;
            user.leverage = leverage;
            s.user_update(&user)
        })
        .await
    }

    /// Apply a partial rights change and return the resulting bitmask
    #[instrument(skip(self))]
    pub async fn set_rights(&self, login: Login, change: RightsChange) -> Result<AccountRights> {
        self.write("user_update", login, move |s| {
            let mut user = s.user_get(login)?;
            user.rights = change.apply(user.rights);
            s.user_update(&user)?;
            Ok(user.rights)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn change_group(&self, login: Login, group: String) -> Result<()> {
        if group.trim().is_empty() {
            return Err(GatewayError::Validation("group is required".into()));
        }
        let group_name = group.clone();
        self.write("user_update", login, move |s| {
            let mut user = s.user_get(login)?;
            user.group = group;
            s.user_update(&user)
        })
        .await?;

        if let Some(mut record) = self.store.find_account_by_login(login).await? {
            record.group_name = Some(group_name);
            record.updated_at = Utc::now();
            self.store.upsert_account(&record).await?;
        }
        Ok(())
    }

    /// Revoke login rights on the venue; the local row is kept but inactive
    #[instrument(skip(self))]
    pub async fn disable_account(&self, login: Login) -> Result<()> {
        self.set_rights(
            login,
            RightsChange {
                enabled: Some(false),
                trading: Some(false),
                ..Default::default()
            },
        )
        .await?;
        self.store.mark_account_inactive(login).await?;
        info!("Disabled account {}", login);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountRecord, DealKind};
    use crate::test_support::Harness;
    use crate::venue::VenueCode;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn balance_reads_from_venue() {
        let h = Harness::connected().await;
        h.venue.add_account(2001, "real\\standard", dec!(500));
        assert_eq!(h.gateway.get_balance(2001).await.unwrap(), dec!(500));
        assert_eq!(h.gateway.get_equity(2001).await.unwrap(), dec!(500));
        assert_eq!(h.gateway.get_profit(2001).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn missing_account_returns_default_and_is_cached() {
        let h = Harness::connected().await;
        h.store
            .upsert_account(&AccountRecord {
                login: 404,
                owner_user_id: 1,
                balance: dec!(10),
                group_name: None,
                active: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(h.gateway.get_balance(404).await.unwrap(), Decimal::ZERO);
        let calls = h.venue.call_count();
        assert_eq!(h.gateway.get_balance(404).await.unwrap(), Decimal::ZERO);
        assert_eq!(h.venue.call_count(), calls);

        let record = h.store.find_account_by_login(404).await.unwrap().unwrap();
        assert!(!record.active);
    }

    #[tokio::test]
    async fn miss_cache_is_per_data_type() {
        let h = Harness::connected().await;
        assert_eq!(h.gateway.get_balance(7).await.unwrap(), Decimal::ZERO);
        let calls = h.venue.call_count();
        assert!(h.gateway.get_positions(7).await.unwrap().is_empty());
        assert!(h.venue.call_count() > calls);
    }

    #[tokio::test]
    async fn permission_errors_propagate_on_reads() {
        let h = Harness::connected().await;
        h.venue.add_account(2002, "real\\standard", dec!(1));
        h.venue.fail_next_account_get(VenueCode::ERR_PERMISSIONS);
        let err = h.gateway.get_balance(2002).await.unwrap_err();
        assert!(matches!(err, GatewayError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn read_timeout_behaves_as_no_data() {
        let h = Harness::with_timeout(Duration::from_millis(20)).await;
        h.venue.add_account(2003, "real\\standard", dec!(75));
        h.venue.set_latency(Some(Duration::from_millis(200)));
        assert_eq!(h.gateway.get_balance(2003).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn write_timeout_is_an_error() {
        let h = Harness::with_timeout(Duration::from_millis(20)).await;
        h.venue.add_account(2004, "real\\standard", dec!(75));
        h.venue.set_latency(Some(Duration::from_millis(200)));
        let err = h.gateway.set_leverage(2004, 100).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
    }

    #[tokio::test]
    async fn non_numeric_deal_query_skips_venue() {
        let h = Harness::connected().await;
        let calls = h.venue.call_count();
        let deals = h
            .gateway
            .get_deals("abc", Utc::now() - ChronoDuration::days(1), Utc::now())
            .await
            .unwrap();
        assert!(deals.is_empty());
        assert_eq!(h.venue.call_count(), calls);
    }

    #[tokio::test]
    async fn deal_range_is_capped() {
        let h = Harness::connected().await;
        h.venue.add_account(2005, "real\\standard", dec!(0));
        let now = Utc::now();
        for (id, age_days) in [(1u64, 10i64), (2, 200)] {
            h.venue.add_deal(Deal {
                deal_id: id,
                login: 2005,
                time: now - ChronoDuration::days(age_days),
                kind: DealKind::Balance,
                symbol: None,
                volume: Decimal::ZERO,
                price: Decimal::ZERO,
                profit: dec!(1),
                commission: Decimal::ZERO,
                comment: String::new(),
            });
        }

        let deals = h
            .gateway
            .get_deals("2005", now - ChronoDuration::days(365), now)
            .await
            .unwrap();
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].deal_id, 1);
    }

    #[tokio::test]
    async fn summary_combines_figures_and_user() {
        let h = Harness::connected().await;
        h.venue.add_account(2006, "real\\standard", dec!(250));
        let summary = h.gateway.account_summary(2006).await.unwrap();
        assert!(summary.found);
        assert_eq!(summary.balance, dec!(250));
        assert_eq!(summary.group.as_deref(), Some("real\\standard"));

        let missing = h.gateway.account_summary(9999).await.unwrap();
        assert!(!missing.found);
    }

    #[tokio::test]
    async fn create_account_maps_vendor_failures() {
        let h = Harness::connected().await;
        let login = h.gateway.create_account(Harness::new_account(0)).await.unwrap();
        assert!(login > 0);

        let err = h
            .gateway
            .create_account(Harness::new_account(login))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateEntity(_)));

        h.venue.exhaust_logins(true);
        let err = h.gateway.create_account(Harness::new_account(0)).await.unwrap_err();
        assert!(matches!(err, GatewayError::CapacityExhausted(_)));
    }

    #[tokio::test]
    async fn rights_and_leverage_updates_reach_venue() {
        let h = Harness::connected().await;
        h.venue.add_account(2007, "real\\standard", dec!(0));

        h.gateway.set_leverage(2007, 200).await.unwrap();
        assert_eq!(h.gateway.get_leverage(2007).await.unwrap(), 200);

        let rights = h
            .gateway
            .set_rights(
                2007,
                RightsChange {
                    algo_trading: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(rights.algo_trading_allowed());

        h.gateway.disable_account(2007).await.unwrap();
        let user = h.venue.user(2007).unwrap();
        assert!(!user.rights.is_enabled());
        assert!(!user.rights.trading_allowed());
    }

    #[tokio::test]
    async fn unavailable_connection_propagates() {
        let h = Harness::without_settings();
        let err = h.gateway.get_balance(1).await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionUnavailable(_)));
    }
}
