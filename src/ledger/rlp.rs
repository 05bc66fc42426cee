//! Recursive Length Prefix encoding, limited to flat lists of byte strings
//! (the shape of a legacy transaction).

use crate::error::{AnchorError, Result};

pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        return bytes.to_vec();
    }
    let mut out = length_prefix(0x80, bytes.len());
    out.extend_from_slice(bytes);
    out
}

/// Integers are encoded big-endian without leading zeros; zero is the
/// empty string.
pub fn encode_uint(value: u128) -> Vec<u8> {
    encode_bytes(trim_leading_zeros(&value.to_be_bytes()))
}

/// Wrap already-encoded items in a list header.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len = items.iter().map(Vec::len).sum();
    let mut out = length_prefix(0xc0, payload_len);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

pub fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn length_prefix(offset: u8, len: usize) -> Vec<u8> {
    if len < 56 {
        vec![offset + len as u8]
    } else {
        let len_bytes = len.to_be_bytes();
        let trimmed = trim_leading_zeros(&len_bytes);
        let mut out = vec![offset + 55 + trimmed.len() as u8];
        out.extend_from_slice(trimmed);
        out
    }
}

/// Decode a list whose elements are all byte strings.
pub fn decode_flat_list(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let (is_list, payload, rest) = split_item(data)?;
    if !is_list {
        return Err(malformed("expected a list"));
    }
    if !rest.is_empty() {
        return Err(malformed("trailing bytes after list"));
    }

    let mut items = Vec::new();
    let mut remaining = payload;
    while !remaining.is_empty() {
        let (nested, item, rest) = split_item(remaining)?;
        if nested {
            return Err(malformed("nested lists are not supported"));
        }
        items.push(item.to_vec());
        remaining = rest;
    }
    Ok(items)
}

/// Decode a big-endian integer field.
pub fn decode_uint(bytes: &[u8]) -> Result<u128> {
    if bytes.len() > 16 {
        return Err(malformed("integer wider than 128 bits"));
    }
    if bytes.first() == Some(&0) {
        return Err(malformed("integer has leading zeros"));
    }
    Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

/// Returns `(is_list, payload, rest)`.
fn split_item(data: &[u8]) -> Result<(bool, &[u8], &[u8])> {
    let prefix = *data.first().ok_or_else(|| malformed("unexpected end of input"))?;
    let (is_list, header_len, payload_len) = match prefix {
        0x00..=0x7f => return Ok((false, &data[..1], &data[1..])),
        0x80..=0xb7 => (false, 1, usize::from(prefix - 0x80)),
        0xb8..=0xbf => {
            let len_of_len = usize::from(prefix - 0xb7);
            (false, 1 + len_of_len, read_length(data, len_of_len)?)
        }
        0xc0..=0xf7 => (true, 1, usize::from(prefix - 0xc0)),
        0xf8..=0xff => {
            let len_of_len = usize::from(prefix - 0xf7);
            (true, 1 + len_of_len, read_length(data, len_of_len)?)
        }
    };
    let end = header_len
        .checked_add(payload_len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| malformed("item longer than input"))?;
    Ok((is_list, &data[header_len..end], &data[end..]))
}

fn read_length(data: &[u8], len_of_len: usize) -> Result<usize> {
    let bytes = data
        .get(1..1 + len_of_len)
        .ok_or_else(|| malformed("truncated length"))?;
    if len_of_len > std::mem::size_of::<usize>() {
        return Err(malformed("length overflows usize"));
    }
    Ok(bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b)))
}

fn malformed(reason: &str) -> AnchorError {
    AnchorError::ProtocolError(format!("malformed RLP: {}", reason))
}
