pub mod anchor;
pub mod config;
pub mod error;
pub mod hashing;
pub mod ledger;

pub use anchor::{AnchorRecord, AnchorWriter, TamperVerifier, VerificationResult};
pub use config::AnchorConfig;
pub use error::AnchorError;
pub use hashing::{hash_event, hash_event_at, EventDetails, EventRecord, EventTimestamp, LogHash};
pub use ledger::{LedgerConnection, LedgerLogClient, LogEntry};
