pub mod sync;

pub use sync::{GroupDirectory, SyncReport};
