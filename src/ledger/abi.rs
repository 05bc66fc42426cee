//! Contract ABI Codec
//!
//! Just enough of the Solidity ABI to drive the security log contract:
//! `uint256` and `string` parameters, function selectors, event topics and
//! `Error(string)` revert payloads.
//!
//! Contract surface:
//!
//! ```text
//! function addLog(string _logHash, string _logType)
//! function getLog(uint256 logId) view returns (uint256, string, string)
//! function logCount() view returns (uint256)
//! event LogAdded(uint256 indexed logId, string logHash, string logType, uint256 timestamp)
//! ```

use crate::error::{AnchorError, Result};
use crate::ledger::keccak256;

pub const ADD_LOG: &str = "addLog(string,string)";
pub const GET_LOG: &str = "getLog(uint256)";
pub const LOG_COUNT: &str = "logCount()";
pub const LOG_ADDED: &str = "LogAdded(uint256,string,string,uint256)";

const ERROR_STRING: &str = "Error(string)";
const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Uint,
    String,
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

pub fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Encode a parameter tuple (head/tail layout).
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let mut head = Vec::with_capacity(tokens.len() * WORD);
    let mut tail = Vec::new();
    let head_size = tokens.len() * WORD;

    for token in tokens {
        match token {
            Token::Uint(value) => head.extend_from_slice(&uint_word(*value)),
            Token::String(text) => {
                head.extend_from_slice(&uint_word((head_size + tail.len()) as u64));
                let bytes = text.as_bytes();
                tail.extend_from_slice(&uint_word(bytes.len() as u64));
                tail.extend_from_slice(bytes);
                let padding = (WORD - bytes.len() % WORD) % WORD;
                tail.extend(std::iter::repeat(0u8).take(padding));
            }
        }
    }

    head.extend(tail);
    head
}

/// Selector followed by encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(encode(tokens));
    data
}

pub fn decode(kinds: &[Kind], data: &[u8]) -> Result<Vec<Token>> {
    kinds
        .iter()
        .enumerate()
        .map(|(index, kind)| match kind {
            Kind::Uint => read_uint(data, index * WORD).map(Token::Uint),
            Kind::String => {
                let offset = to_usize(read_uint(data, index * WORD)?)?;
                let length = to_usize(read_uint(data, offset)?)?;
                let start = offset.saturating_add(WORD);
                let end = start.saturating_add(length);
                let bytes = data
                    .get(start..end)
                    .ok_or_else(|| truncated(end, data.len()))?;
                String::from_utf8(bytes.to_vec())
                    .map(Token::String)
                    .map_err(|e| AnchorError::ProtocolError(format!("string is not UTF-8: {}", e)))
            }
        })
        .collect()
}

fn read_uint(data: &[u8], at: usize) -> Result<u64> {
    let end = at.saturating_add(WORD);
    let word = data
        .get(at..end)
        .ok_or_else(|| truncated(end, data.len()))?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AnchorError::ProtocolError(
            "uint256 value does not fit in 64 bits".to_string(),
        ));
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(low))
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| AnchorError::ProtocolError(format!("offset {} out of range", value)))
}

fn truncated(needed: usize, available: usize) -> AnchorError {
    AnchorError::ProtocolError(format!(
        "ABI data truncated: need {} bytes, have {}",
        needed, available
    ))
}

pub fn encode_add_log(log_hash: &str, log_type: &str) -> Vec<u8> {
    encode_call(
        ADD_LOG,
        &[
            Token::String(log_hash.to_string()),
            Token::String(log_type.to_string()),
        ],
    )
}

pub fn encode_get_log(log_id: u64) -> Vec<u8> {
    encode_call(GET_LOG, &[Token::Uint(log_id)])
}

pub fn encode_log_count() -> Vec<u8> {
    encode_call(LOG_COUNT, &[])
}

/// Decode `getLog` output into `(timestamp, log_hash, log_type)`.
pub fn decode_get_log(data: &[u8]) -> Result<(u64, String, String)> {
    match decode(&[Kind::Uint, Kind::String, Kind::String], data)?.as_slice() {
        [Token::Uint(timestamp), Token::String(hash), Token::String(log_type)] => {
            Ok((*timestamp, hash.clone(), log_type.clone()))
        }
        _ => Err(AnchorError::ProtocolError("unexpected getLog output".to_string())),
    }
}

pub fn decode_log_count(data: &[u8]) -> Result<u64> {
    read_uint(data, 0)
}

/// Decode a `LogAdded` event into `(log_id, log_hash, log_type, timestamp)`.
pub fn decode_log_added(topics: &[[u8; 32]], data: &[u8]) -> Result<(u64, String, String, u64)> {
    let log_id_topic = topics
        .get(1)
        .ok_or_else(|| AnchorError::ProtocolError("LogAdded without logId topic".to_string()))?;
    let log_id = read_uint(log_id_topic, 0)?;
    match decode(&[Kind::String, Kind::String, Kind::Uint], data)?.as_slice() {
        [Token::String(hash), Token::String(log_type), Token::Uint(timestamp)] => {
            Ok((log_id, hash.clone(), log_type.clone(), *timestamp))
        }
        _ => Err(AnchorError::ProtocolError("unexpected LogAdded data".to_string())),
    }
}

/// Extract the message from an `Error(string)` revert payload.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&selector(ERROR_STRING)[..])?;
    match decode(&[Kind::String], body).ok()?.pop()? {
        Token::String(reason) => Some(reason),
        Token::Uint(_) => None,
    }
}

pub fn encode_revert_reason(reason: &str) -> Vec<u8> {
    encode_call(ERROR_STRING, &[Token::String(reason.to_string())])
}
