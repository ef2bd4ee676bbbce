pub mod manager;

pub use manager::{ConnectOptions, ConnectionManager, ConnectionStatus, ManagedConnection};
