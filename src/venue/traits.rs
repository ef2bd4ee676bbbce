use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;

use super::{GroupDescriptor, VenueCode};
use crate::domain::{
    AccountFigures, BalanceOperation, Deal, Login, NewAccount, PasswordKind, Position, VenueUser,
};
use crate::secrets::SecretString;

pub type VenueResult<T> = std::result::Result<T, VenueCode>;

/// Session flavour requested at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerMode {
    /// Request/response only
    #[default]
    Default,
    /// Also subscribe to pushed user and group updates
    Pumping,
}

/// Arguments of the vendor connect primitive
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub address: String,
    pub login: u64,
    pub secret: SecretString,
    pub mode: ManagerMode,
    pub timeout: Duration,
}

/// One live manager session. Every call blocks the calling thread.
pub trait VenueSession: Send {
    fn user_get(&mut self, login: Login) -> VenueResult<VenueUser>;

    /// Returns the login assigned by the venue
    fn user_add(&mut self, account: &NewAccount) -> VenueResult<Login>;

    fn user_update(&mut self, user: &VenueUser) -> VenueResult<()>;

    fn user_delete(&mut self, login: Login) -> VenueResult<()>;

    fn user_password_change(
        &mut self,
        login: Login,
        kind: PasswordKind,
        password: &SecretString,
    ) -> VenueResult<()>;

    fn user_account_get(&mut self, login: Login) -> VenueResult<AccountFigures>;

    fn group_total(&mut self) -> u32;

    fn group_next(&mut self, index: u32) -> VenueResult<GroupDescriptor>;

    fn deal_request(
        &mut self,
        login: Login,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> VenueResult<Vec<Deal>>;

    /// Balance adjustment; returns the venue deal id
    fn dealer_balance(
        &mut self,
        login: Login,
        amount: Decimal,
        operation: BalanceOperation,
        comment: &str,
    ) -> VenueResult<u64>;

    fn position_get(&mut self, login: Login) -> VenueResult<Vec<Position>>;

    fn last_error(&self) -> VenueCode;

    /// Best-effort teardown; never fails
    fn disconnect(&mut self);
}

/// The vendor connect primitive
pub trait VenueConnector: Send + Sync {
    fn connect(&self, params: &ConnectParams) -> VenueResult<Box<dyn VenueSession>>;
}
