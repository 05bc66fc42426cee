//! Anchor Writer
//!
//! Hashes an event and appends the digest to the ledger. The event itself is
//! never sent anywhere.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::hashing::{EventDetails, EventRecord, EventTimestamp, LogHash};
use crate::ledger::{LedgerConnection, LedgerLogClient, TxHash};

/// Receipt of an anchoring write.
///
/// `event_timestamp` is the value that went into the digest; verification
/// needs it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub log_hash: LogHash,
    pub log_type: String,
    pub event_timestamp: EventTimestamp,
    pub transaction: TxHash,
    pub nonce: u64,
}

pub struct AnchorWriter<C> {
    client: Arc<LedgerLogClient<C>>,
}

impl<C: LedgerConnection> AnchorWriter<C> {
    pub fn new(client: Arc<LedgerLogClient<C>>) -> Self {
        Self { client }
    }

    /// Hash `(event_type, details)` at the current time and anchor it.
    ///
    /// Returns once the transaction is accepted by the node. Nothing is
    /// retried.
    pub async fn write_event(
        &self,
        event_type: &str,
        details: &EventDetails,
    ) -> Result<AnchorRecord> {
        let record = EventRecord::now(event_type, details.clone());
        self.write_record(&record).await
    }

    /// Anchor a record whose timestamp the caller already fixed.
    pub async fn write_record(&self, record: &EventRecord) -> Result<AnchorRecord> {
        let log_hash = record.digest()?;
        let outcome = self.client.append(log_hash.as_str(), &record.event).await?;

        info!(
            "Anchored {} event as {} (tx {})",
            record.event, log_hash, outcome.transaction
        );

        Ok(AnchorRecord {
            log_hash,
            log_type: record.event.clone(),
            event_timestamp: record.timestamp,
            transaction: outcome.transaction,
            nonce: outcome.nonce,
        })
    }
}
