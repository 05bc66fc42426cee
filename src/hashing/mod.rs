//! Canonical Event Hashing
//!
//! Deterministic serialization and SHA-256 fingerprinting of security
//! events. The digest is what gets anchored on the ledger; the event itself
//! never leaves the caller.

pub mod canonical;
pub mod record;

pub use canonical::to_canonical_json;
pub use record::{EventDetails, EventRecord, EventTimestamp, HashedEvent, LogHash};

use crate::error::Result;

/// Hash an event stamped with the current UTC time.
///
/// Two calls with identical inputs produce different digests because the
/// timestamp is part of the hashed record. The returned [`HashedEvent`]
/// carries the timestamp so it can be supplied again at verification time.
pub fn hash_event(event_type: &str, details: &EventDetails) -> Result<HashedEvent> {
    let record = EventRecord::now(event_type, details.clone());
    let log_hash = record.digest()?;
    Ok(HashedEvent {
        log_hash,
        timestamp: record.timestamp,
    })
}

/// Hash an event with a caller-supplied timestamp.
pub fn hash_event_at(
    event_type: &str,
    details: &EventDetails,
    timestamp: EventTimestamp,
) -> Result<LogHash> {
    EventRecord::new(event_type, details.clone(), timestamp).digest()
}
