pub mod api_server;
pub mod postgres;

pub use api_server::start_api_server;
pub use postgres::PostgresStore;
