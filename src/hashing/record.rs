//! Event Record Types
//!
//! The transient record that gets hashed, and the digest it produces.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

use crate::error::{AnchorError, Result};
use crate::hashing::canonical::to_canonical_json;

/// Structured event payload: a JSON object keyed by strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct EventDetails(Map<String, Value>);

impl EventDetails {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Validate an untyped payload. Only JSON objects are accepted.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(AnchorError::EncodingError(format!(
                "event details must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Convert any serializable type into details.
    pub fn from_serializable<T: Serialize>(payload: &T) -> Result<Self> {
        let value = serde_json::to_value(payload)
            .map_err(|e| AnchorError::EncodingError(format!("details not serializable: {}", e)))?;
        Self::from_value(value)
    }

    /// Parse details from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| AnchorError::EncodingError(format!("invalid details JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl TryFrom<Value> for EventDetails {
    type Error = AnchorError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<EventDetails> for Value {
    fn from(details: EventDetails) -> Self {
        Value::Object(details.0)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for EventDetails {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// UTC instant with microsecond precision.
///
/// Renders as `YYYY-MM-DDTHH:MM:SS[.ffffff]+00:00`; the fraction is omitted
/// when it is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventTimestamp(DateTime<Utc>);

impl EventTimestamp {
    /// Wrap an instant, truncating anything finer than a microsecond.
    ///
    /// Two instants within the same microsecond become equal here, so they
    /// render and hash identically.
    pub fn new(instant: DateTime<Utc>) -> Self {
        let truncated = instant
            .duration_trunc(Duration::microseconds(1))
            .unwrap_or(instant);
        Self(truncated)
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn plus_seconds(self, seconds: i64) -> Self {
        Self(self.0 + Duration::seconds(seconds))
    }

    pub fn to_iso8601(&self) -> String {
        let micros = self.0.nanosecond() / 1_000;
        let base = self.0.format("%Y-%m-%dT%H:%M:%S");
        if micros == 0 {
            format!("{}+00:00", base)
        } else {
            format!("{}.{:06}+00:00", base, micros)
        }
    }
}

impl fmt::Display for EventTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

/// Parses RFC 3339. Fractions beyond six digits are truncated, not rejected.
impl FromStr for EventTimestamp {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| Self::new(dt.with_timezone(&Utc)))
            .map_err(|e| AnchorError::EncodingError(format!("invalid timestamp {:?}: {}", s, e)))
    }
}

impl From<DateTime<Utc>> for EventTimestamp {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::new(instant)
    }
}

impl Serialize for EventTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

impl<'de> Deserialize<'de> for EventTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Hex-encoded SHA-256 digest, always 64 lowercase characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogHash(String);

impl LogHash {
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    /// Parse a digest, accepting either case.
    pub fn parse(text: &str) -> Result<Self> {
        let normalized = text.trim().to_ascii_lowercase();
        if normalized.len() != 64 || !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AnchorError::EncodingError(format!(
                "log hash must be 64 hex characters, got {:?}",
                text
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a digest read back from the ledger.
    ///
    /// Case is the only normalisation applied. Runs in constant time when
    /// the lengths agree.
    pub fn matches(&self, stored: &str) -> bool {
        let stored = stored.to_ascii_lowercase();
        self.0.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}

impl fmt::Display for LogHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LogHash {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for LogHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for LogHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// The record that is serialized and hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: String,
    pub details: EventDetails,
    pub timestamp: EventTimestamp,
}

impl EventRecord {
    pub fn new(event_type: &str, details: EventDetails, timestamp: EventTimestamp) -> Self {
        Self {
            event: event_type.to_string(),
            details,
            timestamp,
        }
    }

    /// Record stamped with the current time.
    pub fn now(event_type: &str, details: EventDetails) -> Self {
        Self::new(event_type, details, EventTimestamp::now())
    }

    /// Canonical text of `{details, event, timestamp}`.
    pub fn canonical_json(&self) -> Result<String> {
        let mut record = Map::new();
        record.insert("details".to_string(), Value::Object(self.details.0.clone()));
        record.insert("event".to_string(), Value::String(self.event.clone()));
        record.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_iso8601()),
        );
        to_canonical_json(&Value::Object(record))
    }

    pub fn digest(&self) -> Result<LogHash> {
        let canonical = self.canonical_json()?;
        let digest: [u8; 32] = Sha256::digest(canonical.as_bytes()).into();
        Ok(LogHash::from_digest(digest))
    }
}

/// Digest plus the timestamp that went into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashedEvent {
    pub log_hash: LogHash,
    pub timestamp: EventTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_details_reject_non_objects() {
        for value in [json!(null), json!([1, 2]), json!("text"), json!(4)] {
            let err = EventDetails::from_value(value).unwrap_err();
            assert!(matches!(err, AnchorError::EncodingError(_)));
        }
    }

    #[test]
    fn test_details_from_serializable() {
        #[derive(Serialize)]
        struct Login<'a> {
            user: &'a str,
            attempts: u32,
        }

        let details = EventDetails::from_serializable(&Login {
            user: "alice",
            attempts: 3,
        })
        .unwrap();
        assert_eq!(details.get("attempts"), Some(&json!(3)));
        assert_eq!(details.len(), 2);
    }

    #[test]
    fn test_details_with_non_string_keys_are_rejected() {
        let mut payload = std::collections::HashMap::new();
        payload.insert(vec![1u8], "value");
        let err = EventDetails::from_serializable(&payload).unwrap_err();
        assert!(matches!(err, AnchorError::EncodingError(_)));
    }

    #[test]
    fn test_timestamp_rendering() {
        let ts: EventTimestamp = "2025-01-02T03:04:05.000006Z".parse().unwrap();
        assert_eq!(ts.to_iso8601(), "2025-01-02T03:04:05.000006+00:00");

        let whole: EventTimestamp = "2025-01-02T03:04:05+00:00".parse().unwrap();
        assert_eq!(whole.to_iso8601(), "2025-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_timestamp_converts_offsets_and_truncates() {
        let ts: EventTimestamp = "2025-01-02T05:04:05.1234569+02:00".parse().unwrap();
        assert_eq!(ts.to_iso8601(), "2025-01-02T03:04:05.123456+00:00");
    }

    #[test]
    fn test_timestamp_serde_roundtrip_keeps_digest_input() {
        let ts = EventTimestamp::now();
        let json = serde_json::to_string(&ts).unwrap();
        let back: EventTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn test_log_hash_parse() {
        let upper = "AB".repeat(32);
        let parsed = LogHash::parse(&upper).unwrap();
        assert_eq!(parsed.as_str(), "ab".repeat(32));
        assert!(LogHash::parse("abc").is_err());
        assert!(LogHash::parse(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_log_hash_matches_ignores_case_only() {
        let hash = LogHash::parse(&"cd".repeat(32)).unwrap();
        assert!(hash.matches(&"CD".repeat(32)));
        assert!(!hash.matches(&format!(" {}", "cd".repeat(32))));
        assert!(!hash.matches(&"cd".repeat(31)));
    }
}
