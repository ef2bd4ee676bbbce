//! Persistence seam for the gateway
//!
//! The gateway only needs a narrow slice of the back-office database:
//! - account lookups and the inactive flag
//! - the trading-group mirror
//! - fund operation records, transfer sagas and the audit log
//! - the append-only connection settings table

pub mod memory;
pub mod record_store;

pub use memory::MemoryStore;
pub use record_store::{RecordStore, SettingsSource};
