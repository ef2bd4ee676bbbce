pub mod router;

pub use router::{FallbackPolicy, FundRouter, TransferReceipt, FALLBACK_MARKER};
