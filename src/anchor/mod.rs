//! Anchoring Module
//!
//! The write path (hash an event, append the digest) and the tamper check
//! (recompute a claimed event's digest and compare it with the stored one).

pub mod verifier;
pub mod writer;

pub use verifier::{TamperVerifier, VerificationResult};
pub use writer::{AnchorRecord, AnchorWriter};
