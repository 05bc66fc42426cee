//! Canonical JSON
//!
//! The canonical form is the byte stream produced by the deployed writer
//! (`json.dumps(record, sort_keys=True)`), so digests anchored by earlier
//! tooling still verify:
//!
//! * object keys sorted by code point at every depth,
//! * `", "` between items and `": "` between key and value,
//! * everything outside printable ASCII escaped as lowercase `\uXXXX`,
//!   with surrogate pairs above the BMP,
//! * integers exactly as written, with `-0` as `0`,
//! * floats in shortest round-trip form, exponent notation outside
//!   `1e-4 ..= 1e16`.
//!
//! Numbers are kept as their source literal (`arbitrary_precision`) so
//! integers wider than 64 bits never pass through `f64`.

use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::io::{self, Write};

use crate::error::Result;

/// Serialize a JSON value to its canonical text.
pub fn to_canonical_json(value: &Value) -> Result<String> {
    let sorted = sort_keys(value);
    let mut out = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter);
    serde::Serialize::serialize(&sorted, &mut serializer)?;
    // The formatter only ever emits ASCII.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Rebuild every object with its keys inserted in sorted order.
///
/// `serde_json::Map` iterates sorted unless `preserve_order` gets enabled
/// somewhere in the dependency graph, so ordering is never left to it.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            if (' '..='~').contains(&ch) {
                continue;
            }
            writer.write_all(fragment[start..index].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }

    fn write_f32<W>(&mut self, writer: &mut W, value: f32) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.write_f64(writer, f64::from(value))
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(float_repr(value).as_bytes())
    }

    fn write_number_str<W>(&mut self, writer: &mut W, value: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(number_repr(value).as_bytes())
    }
}

/// Render a JSON number literal the way Python re-serializes it.
fn number_repr(literal: &str) -> String {
    if !literal.contains(|c| matches!(c, '.' | 'e' | 'E')) {
        return if literal == "-0" {
            "0".to_string()
        } else {
            literal.to_string()
        };
    }
    match literal.parse::<f64>() {
        Ok(value) => float_repr(value),
        Err(_) => literal.to_string(),
    }
}

fn float_repr(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let scientific = format!("{:e}", value.abs());
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return value.to_string();
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return value.to_string();
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let decimal_point = exponent + 1;

    let mut out = String::with_capacity(digits.len() + 8);
    if value.is_sign_negative() {
        out.push('-');
    }

    if decimal_point <= -4 || decimal_point > 16 {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exponent < 0 { '-' } else { '+' };
        out.push_str(&format!("e{}{:02}", sign, exponent.abs()));
    } else if decimal_point <= 0 {
        out.push_str("0.");
        out.push_str(&"0".repeat(decimal_point.unsigned_abs() as usize));
        out.push_str(&digits);
    } else {
        let split = decimal_point as usize;
        if split >= digits.len() {
            out.push_str(&digits);
            out.push_str(&"0".repeat(split - digits.len()));
            out.push_str(".0");
        } else {
            out.push_str(&digits[..split]);
            out.push('.');
            out.push_str(&digits[split..]);
        }
    }
    out
}
