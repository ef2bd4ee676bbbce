pub mod group_sync;
pub mod health;
pub mod settings;

pub use group_sync::GroupSyncService;
pub use health::{ComponentHealth, HealthReporter, HealthResponse, HealthStatus};
pub use settings::{RotateSettings, SettingsRotator};
