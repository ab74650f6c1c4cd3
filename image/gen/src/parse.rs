/*++

Licensed under the Apache-2.0 license.

File Name:

   parse.rs

Abstract:

    File contains helpers that read numbers and byte strings from configuration values.

--*/

use anyhow::Context;
use serde_json::Value;
use sptool_error::SptoolError;
use std::path::Path;

use crate::error;

/// Parse an integer with an optional `0x`, `0b` or `0o` prefix
///
/// Underscores are accepted as digit separators.
pub fn parse_int(text: &str) -> anyhow::Result<u64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else {
        (lower.as_str(), 10)
    };
    u64::from_str_radix(digits, radix)
        .map_err(|_| error(SptoolError::PARSE_INVALID_NUMBER, format!("Invalid number `{text}`")))
}

/// Read an integer from a JSON number or a prefixed string
pub fn value_to_u64(value: &Value) -> anyhow::Result<u64> {
    match value {
        Value::Number(number) => number.as_u64().ok_or_else(|| {
            error(
                SptoolError::PARSE_INVALID_NUMBER,
                format!("Invalid number `{number}`"),
            )
        }),
        Value::String(text) => parse_int(text),
        Value::Bool(flag) => Ok(u64::from(*flag)),
        other => Err(error(
            SptoolError::PARSE_INVALID_NUMBER,
            format!("Expected a number, found `{other}`"),
        )),
    }
}

/// Read an integer that must fit 32 bits
pub fn value_to_u32(value: &Value) -> anyhow::Result<u32> {
    let wide = value_to_u64(value)?;
    u32::try_from(wide).map_err(|_| {
        error(
            SptoolError::PARSE_INVALID_NUMBER,
            format!("Value {wide:#x} does not fit 32 bits"),
        )
    })
}

/// Decode a hex string, ignoring an optional `0x` prefix and whitespace
pub fn parse_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits).map_err(|err| {
        error(
            SptoolError::PARSE_INVALID_HEX,
            format!("Invalid hex string `{text}`: {err}"),
        )
    })
}

/// Decode a hex string of exactly `N` bytes
pub fn parse_hex_array<const N: usize>(text: &str) -> anyhow::Result<[u8; N]> {
    let bytes = parse_hex(text)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        error(
            SptoolError::PARSE_INVALID_HEX,
            format!("Expected {N} bytes of hex, found {len}"),
        )
    })
}

/// Read a key stored as hex text
pub fn read_hex_key_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {}", path.display()))?;
    parse_hex(&text).with_context(|| format!("Invalid key in {}", path.display()))
}

/// Read a byte string from a hex string or a list of byte values
pub fn value_to_bytes(value: &Value) -> anyhow::Result<Vec<u8>> {
    match value {
        Value::String(text) => parse_hex(text),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let byte = value_to_u64(item)?;
                u8::try_from(byte).map_err(|_| {
                    error(
                        SptoolError::PARSE_INVALID_NUMBER,
                        format!("Byte value {byte:#x} out of range"),
                    )
                })
            })
            .collect(),
        other => Err(error(
            SptoolError::PARSE_INVALID_HEX,
            format!("Expected a hex string or a byte list, found `{other}`"),
        )),
    }
}

/// Read a list of 32-bit words from a list or a comma separated string
pub fn value_to_words(value: &Value) -> anyhow::Result<Vec<u32>> {
    match value {
        Value::Array(items) => items.iter().map(value_to_u32).collect(),
        Value::String(text) => text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| value_to_u32(&Value::String(item.to_string())))
            .collect(),
        other => value_to_u32(other).map(|word| vec![word]),
    }
}
