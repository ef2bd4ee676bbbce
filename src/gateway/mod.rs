pub mod account_ops;

pub use account_ops::AccountGateway;
