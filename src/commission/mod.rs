pub mod ingress;

pub use ingress::{
    CommissionIngress, IngestReceipt, LedgerEntryCreator, LoggingLedger, PositionClosedPayload,
};
