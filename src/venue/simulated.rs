//! In-process venue used for offline mode and tests
//!
//! Behaves like the vendor manager API closely enough to exercise every
//! gateway path: unknown logins answer `ERR_NOTFOUND`, withdrawals beyond the
//! balance answer `TRADE_NO_MONEY`, and faults can be injected per call.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{ConnectParams, GroupDescriptor, VenueCode, VenueConnector, VenueResult, VenueSession};
use crate::domain::{
    AccountFigures, BalanceOperation, Deal, DealKind, Login, NewAccount, PasswordKind, Position,
    VenueUser,
};
use crate::secrets::SecretString;

const FIRST_LOGIN: Login = 100_000;

#[derive(Debug, Clone)]
struct SimAccount {
    user: VenueUser,
    figures: AccountFigures,
    positions: Vec<Position>,
    deals: Vec<Deal>,
}

/// Faults consumed by the next matching call
#[derive(Debug, Default)]
struct Faults {
    refuse_connect: Option<VenueCode>,
    next_balance: Option<VenueCode>,
    next_balance_after: usize,
    next_account_get: Option<VenueCode>,
    login_exhausted: bool,
    latency: Option<Duration>,
    /// Balance calls from this index on sleep before applying
    slow_balance: Option<(usize, Duration)>,
    connect_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct VenueState {
    accounts: HashMap<Login, SimAccount>,
    groups: Vec<GroupDescriptor>,
    next_login: Login,
    next_deal: u64,
    accepted_secret: Option<String>,
    faults: Faults,
    last_connect: Option<(String, u64)>,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    live_sessions: AtomicUsize,
    max_live_sessions: AtomicUsize,
    calls: AtomicUsize,
    balance_calls: AtomicUsize,
}

/// Shared venue state; clones observe the same accounts and counters
#[derive(Debug, Clone, Default)]
pub struct SimulatedVenue {
    state: Arc<Mutex<VenueState>>,
    counters: Arc<Counters>,
}

impl SimulatedVenue {
    pub fn new() -> Self {
        let venue = Self::default();
        venue.state.lock().next_login = FIRST_LOGIN;
        venue
    }

    /// Seeded with a live and a demo group, for offline runs
    pub fn with_demo_data() -> Self {
        let venue = Self::new();
        venue.add_group(
            GroupDescriptor::new()
                .with_field("group", "real\\standard")
                .with_field("currency", "USD"),
        );
        venue.add_group(
            GroupDescriptor::new()
                .with_field("group", "demo\\standard")
                .with_field("currency", "USD"),
        );
        venue
    }

    pub fn connector(&self) -> SimulatedConnector {
        SimulatedConnector {
            venue: self.clone(),
        }
    }

    pub fn require_secret(&self, secret: &str) {
        self.state.lock().accepted_secret = Some(secret.to_string());
    }

    pub fn add_group(&self, descriptor: GroupDescriptor) {
        self.state.lock().groups.push(descriptor);
    }

    pub fn set_groups(&self, descriptors: Vec<GroupDescriptor>) {
        self.state.lock().groups = descriptors;
    }

    pub fn add_account(&self, login: Login, group: &str, balance: Decimal) {
        let mut state = self.state.lock();
        state.accounts.insert(
            login,
            SimAccount {
                user: VenueUser {
                    login,
                    name: format!("Account {login}"),
                    group: group.to_string(),
                    leverage: 100,
                    rights: crate::domain::AccountRights::DEFAULT_NEW,
                    email: None,
                    registered_at: Some(Utc::now()),
                },
                figures: AccountFigures {
                    login,
                    balance,
                    equity: balance,
                    margin_free: balance,
                    ..Default::default()
                },
                positions: Vec::new(),
                deals: Vec::new(),
            },
        );
        if login >= state.next_login {
            state.next_login = login + 1;
        }
    }

    pub fn add_position(&self, position: Position) {
        let mut state = self.state.lock();
        if let Some(account) = state.accounts.get_mut(&position.login) {
            account.figures.equity += position.profit;
            account.positions.push(position);
        }
    }

    pub fn add_deal(&self, deal: Deal) {
        let mut state = self.state.lock();
        if let Some(account) = state.accounts.get_mut(&deal.login) {
            account.deals.push(deal);
        }
    }

    pub fn remove_account(&self, login: Login) {
        self.state.lock().accounts.remove(&login);
    }

    pub fn balance_of(&self, login: Login) -> Option<Decimal> {
        self.state
            .lock()
            .accounts
            .get(&login)
            .map(|a| a.figures.balance)
    }

    pub fn user(&self, login: Login) -> Option<VenueUser> {
        self.state.lock().accounts.get(&login).map(|a| a.user.clone())
    }

    pub fn refuse_connect(&self, code: Option<VenueCode>) {
        self.state.lock().faults.refuse_connect = code;
    }

    /// Fail the balance call that comes after `skip` successful ones
    pub fn fail_balance_call(&self, code: VenueCode, skip: usize) {
        let mut state = self.state.lock();
        state.faults.next_balance = Some(code);
        state.faults.next_balance_after = skip;
    }

    pub fn fail_next_account_get(&self, code: VenueCode) {
        self.state.lock().faults.next_account_get = Some(code);
    }

    pub fn exhaust_logins(&self, exhausted: bool) {
        self.state.lock().faults.login_exhausted = exhausted;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().faults.latency = latency;
    }

    pub fn slow_connect(&self, delay: Option<Duration>) {
        self.state.lock().faults.connect_delay = delay;
    }

    /// Delay every balance call after the next `skip` ones. The delayed call
    /// still applies once the delay is over.
    pub fn slow_balance_calls(&self, delay: Duration, skip: usize) {
        let from = self.balance_call_count() + skip;
        self.state.lock().faults.slow_balance = Some((from, delay));
    }

    pub fn last_connect(&self) -> Option<(String, u64)> {
        self.state.lock().last_connect.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> usize {
        self.counters.live_sessions.load(Ordering::SeqCst)
    }

    pub fn max_live_sessions(&self) -> usize {
        self.counters.max_live_sessions.load(Ordering::SeqCst)
    }

    /// Total session calls, connects excluded
    pub fn call_count(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub fn balance_call_count(&self) -> usize {
        self.counters.balance_calls.load(Ordering::SeqCst)
    }
}

/// Connect primitive for [`SimulatedVenue`]
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    venue: SimulatedVenue,
}

impl VenueConnector for SimulatedConnector {
    fn connect(&self, params: &ConnectParams) -> VenueResult<Box<dyn VenueSession>> {
        let venue = &self.venue;
        venue.counters.connects.fetch_add(1, Ordering::SeqCst);
        let delay = venue.state.lock().faults.connect_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        {
            let mut state = venue.state.lock();
            if let Some(code) = state.faults.refuse_connect {
                return Err(code);
            }
            if let Some(expected) = state.accepted_secret.as_deref() {
                if expected != params.secret.expose() {
                    return Err(VenueCode::AUTH_ACCOUNT_INVALID);
                }
            }
            state.last_connect = Some((params.address.clone(), params.login));
        }

        let live = venue.counters.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        venue
            .counters
            .max_live_sessions
            .fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(SimulatedSession {
            venue: venue.clone(),
            connected: true,
            last_error: VenueCode::OK,
        }))
    }
}

struct SimulatedSession {
    venue: SimulatedVenue,
    connected: bool,
    last_error: VenueCode,
}

impl SimulatedSession {
    fn enter(&mut self) -> VenueResult<()> {
        self.venue.counters.calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected {
            return self.fail(VenueCode::ERR_CONNECTION);
        }
        let latency = self.venue.state.lock().faults.latency;
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        Ok(())
    }

    fn fail<T>(&mut self, code: VenueCode) -> VenueResult<T> {
        self.last_error = code;
        Err(code)
    }

    fn with_account<T>(
        &mut self,
        login: Login,
        f: impl FnOnce(&mut SimAccount) -> T,
    ) -> VenueResult<T> {
        self.enter()?;
        let result = {
            let mut state = self.venue.state.lock();
            state.accounts.get_mut(&login).map(f)
        };
        match result {
            Some(value) => {
                self.last_error = VenueCode::OK;
                Ok(value)
            }
            None => self.fail(VenueCode::ERR_NOTFOUND),
        }
    }
}

impl VenueSession for SimulatedSession {
    fn user_get(&mut self, login: Login) -> VenueResult<VenueUser> {
        self.with_account(login, |a| a.user.clone())
    }

    fn user_add(&mut self, account: &NewAccount) -> VenueResult<Login> {
        self.enter()?;
        let mut state = self.venue.state.lock();
        if state.faults.login_exhausted {
            drop(state);
            return self.fail(VenueCode::USR_LOGIN_EXHAUSTED);
        }
        let login = if account.login == 0 {
            state.next_login
        } else {
            account.login
        };
        if state.accounts.contains_key(&login) {
            drop(state);
            return self.fail(VenueCode::USR_LOGIN_EXIST);
        }
        if login >= state.next_login {
            state.next_login = login + 1;
        }
        state.accounts.insert(
            login,
            SimAccount {
                user: VenueUser {
                    login,
                    name: account.name.clone(),
                    group: account.group.clone(),
                    leverage: account.leverage,
                    rights: account.rights,
                    email: account.email.clone(),
                    registered_at: Some(Utc::now()),
                },
                figures: AccountFigures::empty(login),
                positions: Vec::new(),
                deals: Vec::new(),
            },
        );
        Ok(login)
    }

    fn user_update(&mut self, user: &VenueUser) -> VenueResult<()> {
        let user = user.clone();
        self.with_account(user.login, move |a| a.user = user)
    }

    fn user_delete(&mut self, login: Login) -> VenueResult<()> {
        self.enter()?;
        let removed = self.venue.state.lock().accounts.remove(&login);
        match removed {
            Some(_) => Ok(()),
            None => self.fail(VenueCode::ERR_NOTFOUND),
        }
    }

    fn user_password_change(
        &mut self,
        login: Login,
        _kind: PasswordKind,
        password: &SecretString,
    ) -> VenueResult<()> {
        if password.is_empty() {
            self.enter()?;
            return self.fail(VenueCode::ERR_PARAMS);
        }
        self.with_account(login, |_| ())
    }

    fn user_account_get(&mut self, login: Login) -> VenueResult<AccountFigures> {
        let injected = self.venue.state.lock().faults.next_account_get.take();
        if let Some(code) = injected {
            self.enter()?;
            return self.fail(code);
        }
        self.with_account(login, |a| a.figures.clone())
    }

    fn group_total(&mut self) -> u32 {
        self.venue.counters.calls.fetch_add(1, Ordering::SeqCst);
        self.venue.state.lock().groups.len() as u32
    }

    fn group_next(&mut self, index: u32) -> VenueResult<GroupDescriptor> {
        self.enter()?;
        let descriptor = self.venue.state.lock().groups.get(index as usize).cloned();
        match descriptor {
            Some(d) => Ok(d),
            None => self.fail(VenueCode::ERR_NOTFOUND),
        }
    }

    fn deal_request(
        &mut self,
        login: Login,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> VenueResult<Vec<Deal>> {
        self.with_account(login, |a| {
            a.deals
                .iter()
                .filter(|d| d.time >= from && d.time <= to)
                .cloned()
                .collect()
        })
    }

    fn dealer_balance(
        &mut self,
        login: Login,
        amount: Decimal,
        operation: BalanceOperation,
        comment: &str,
    ) -> VenueResult<u64> {
        self.enter()?;
        let index = self.venue.counters.balance_calls.fetch_add(1, Ordering::SeqCst);
        let slow = self.venue.state.lock().faults.slow_balance;
        if let Some((from, delay)) = slow {
            if index >= from {
                std::thread::sleep(delay);
            }
        }

        let mut state = self.venue.state.lock();
        if let Some(code) = state.faults.next_balance {
            if state.faults.next_balance_after == 0 {
                state.faults.next_balance = None;
                drop(state);
                return self.fail(code);
            }
            state.faults.next_balance_after -= 1;
        }
        if amount.is_zero() {
            drop(state);
            return self.fail(VenueCode::ERR_PARAMS);
        }

        state.next_deal += 1;
        let deal_id = state.next_deal;
        let Some(account) = state.accounts.get_mut(&login) else {
            drop(state);
            return self.fail(VenueCode::ERR_NOTFOUND);
        };

        let figures = &mut account.figures;
        let available = match operation {
            BalanceOperation::Credit => figures.credit,
            BalanceOperation::Balance | BalanceOperation::Bonus => figures.balance,
        };
        if amount.is_sign_negative() && available + amount < Decimal::ZERO {
            drop(state);
            return self.fail(VenueCode::TRADE_NO_MONEY);
        }
        match operation {
            BalanceOperation::Credit => figures.credit += amount,
            BalanceOperation::Balance | BalanceOperation::Bonus => figures.balance += amount,
        }
        figures.equity += amount;
        figures.margin_free += amount;

        account.deals.push(Deal {
            deal_id,
            login,
            time: Utc::now(),
            kind: DealKind::from_code(operation.code()),
            symbol: None,
            volume: Decimal::ZERO,
            price: Decimal::ZERO,
            profit: amount,
            commission: Decimal::ZERO,
            comment: comment.to_string(),
        });
        drop(state);
        self.last_error = VenueCode::OK;
        Ok(deal_id)
    }

    fn position_get(&mut self, login: Login) -> VenueResult<Vec<Position>> {
        self.with_account(login, |a| a.positions.clone())
    }

    fn last_error(&self) -> VenueCode {
        self.last_error
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.venue
                .counters
                .live_sessions
                .fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountRights;
    use rust_decimal_macros::dec;

    fn connect(venue: &SimulatedVenue) -> Box<dyn VenueSession> {
        venue
            .connector()
            .connect(&ConnectParams {
                address: "sim:443".to_string(),
                login: 1,
                secret: SecretString::new("pw"),
                mode: Default::default(),
                timeout: Duration::from_secs(1),
            })
            .unwrap()
    }

    #[test]
    fn unknown_login_is_not_found() {
        let venue = SimulatedVenue::new();
        let mut session = connect(&venue);
        assert_eq!(session.user_account_get(5), Err(VenueCode::ERR_NOTFOUND));
        assert_eq!(session.last_error(), VenueCode::ERR_NOTFOUND);
    }

    #[test]
    fn withdrawal_beyond_balance_is_refused() {
        let venue = SimulatedVenue::new();
        venue.add_account(10, "real\\std", dec!(50));
        let mut session = connect(&venue);
        let res = session.dealer_balance(10, dec!(-80), BalanceOperation::Balance, "w");
        assert_eq!(res, Err(VenueCode::TRADE_NO_MONEY));
        assert_eq!(venue.balance_of(10), Some(dec!(50)));
    }

    #[test]
    fn user_add_assigns_next_login() {
        let venue = SimulatedVenue::new();
        let mut session = connect(&venue);
        let account = NewAccount {
            login: 0,
            name: "A".into(),
            group: "demo\\std".into(),
            leverage: 100,
            rights: AccountRights::DEFAULT_NEW,
            email: None,
            main_password: SecretString::new("Main1234"),
            investor_password: SecretString::new("Inv12345"),
        };
        let first = session.user_add(&account).unwrap();
        let second = session.user_add(&account).unwrap();
        assert_eq!(first, FIRST_LOGIN);
        assert_eq!(second, FIRST_LOGIN + 1);

        let duplicate = NewAccount {
            login: first,
            ..account
        };
        assert_eq!(session.user_add(&duplicate), Err(VenueCode::USR_LOGIN_EXIST));
    }

    #[test]
    fn dropping_session_releases_live_count() {
        let venue = SimulatedVenue::new();
        let session = connect(&venue);
        assert_eq!(venue.live_sessions(), 1);
        drop(session);
        assert_eq!(venue.live_sessions(), 0);
    }
}
