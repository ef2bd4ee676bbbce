pub mod account;
pub mod commission;
pub mod fund;
pub mod group;
pub mod settings;

pub use account::*;
pub use commission::*;
pub use fund::*;
pub use group::*;
pub use settings::*;
