pub mod accounts;
pub mod funds;
pub mod groups;
pub mod system;
pub mod webhooks;

pub use accounts::*;
pub use funds::*;
pub use groups::*;
pub use system::*;
pub use webhooks::*;
