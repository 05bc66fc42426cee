//! Tamper Verifier
//!
//! Recomputes the digest of a claimed original event and compares it with
//! the digest stored on the ledger. A mismatch is a verdict, not an error.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AnchorError, Result};
use crate::hashing::{EventDetails, EventRecord, EventTimestamp, LogHash};
use crate::ledger::{LedgerConnection, LedgerLogClient};

/// Outcome of checking one log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub log_id: u64,
    /// Seconds since the epoch, as recorded by the ledger.
    pub stored_block_timestamp: u64,
    pub stored_log_type: String,
    /// Raw value read from the ledger.
    pub stored_hash: String,
    pub recomputed_hash: LogHash,
    pub is_valid: bool,
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Log ID:          {}", self.log_id)?;
        writeln!(f, "Stored type:     {}", self.stored_log_type)?;
        writeln!(f, "Block timestamp: {}", self.stored_block_timestamp)?;
        writeln!(f, "Stored hash:     {}", self.stored_hash)?;
        writeln!(f, "Recomputed hash: {}", self.recomputed_hash)?;
        if self.is_valid {
            write!(f, "Verdict:         VALID (log untampered)")
        } else {
            write!(f, "Verdict:         TAMPERED (hash mismatch)")
        }
    }
}

pub struct TamperVerifier<C> {
    client: Arc<LedgerLogClient<C>>,
}

impl<C> Clone for TamperVerifier<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: LedgerConnection + 'static> TamperVerifier<C> {
    pub fn new(client: Arc<LedgerLogClient<C>>) -> Self {
        Self { client }
    }

    /// Check entry `log_id` against the claimed original event.
    ///
    /// Fetch failures (including `NotFoundError`) propagate unchanged. The
    /// claimed event type is hashed but not compared with the stored type.
    /// `claimed_timestamp` carries microsecond precision, so a claim that
    /// differs from the original only below a microsecond still verifies.
    pub async fn verify(
        &self,
        log_id: u64,
        claimed_event_type: &str,
        claimed_details: &EventDetails,
        claimed_timestamp: EventTimestamp,
    ) -> Result<VerificationResult> {
        let record = EventRecord::new(
            claimed_event_type,
            claimed_details.clone(),
            claimed_timestamp,
        );
        self.verify_record(log_id, &record).await
    }

    /// Same as [`verify`](Self::verify) with the claim given as a record.
    pub async fn verify_record(
        &self,
        log_id: u64,
        claimed: &EventRecord,
    ) -> Result<VerificationResult> {
        let entry = self.client.get(log_id).await?;
        let recomputed_hash = claimed.digest()?;
        let is_valid = recomputed_hash.matches(&entry.log_hash);

        if is_valid {
            info!("Log {} verified ({})", log_id, entry.log_type);
        } else {
            warn!(
                "Tampering detected for log {}: stored {} recomputed {}",
                log_id, entry.log_hash, recomputed_hash
            );
        }

        Ok(VerificationResult {
            log_id,
            stored_block_timestamp: entry.block_timestamp,
            stored_log_type: entry.log_type,
            stored_hash: entry.log_hash,
            recomputed_hash,
            is_valid,
        })
    }

    /// Verify several claims concurrently. Results keep the input order;
    /// each claim succeeds or fails on its own. A panic inside a
    /// verification is re-raised on the caller.
    pub async fn verify_many(
        &self,
        claims: Vec<(u64, EventRecord)>,
    ) -> Vec<Result<VerificationResult>> {
        let handles: Vec<_> = claims
            .into_iter()
            .map(|(log_id, record)| {
                let verifier = self.clone();
                tokio::spawn(async move { verifier.verify_record(log_id, &record).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(AnchorError::NetworkError(format!(
                    "verification task cancelled: {}",
                    e
                ))),
            });
        }
        results
    }
}
