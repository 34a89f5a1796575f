//! GATT payload helpers
//!
//! Parsing of user supplied characteristic UUIDs and hex payloads.

use crate::error::DeviceError;
use uuid::Uuid;

/// Parse a 128-bit characteristic UUID.
///
/// Accepts hyphenated, simple and braced forms
/// (`0000fff1-0000-1000-8000-00805f9b34fb`, `{0000fff1-...}`).
pub fn parse_uuid(value: &str) -> Result<Uuid, DeviceError> {
    let trimmed = value.trim();
    let bare = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);

    Uuid::parse_str(bare).map_err(|source| DeviceError::InvalidUuid {
        value: value.to_string(),
        source,
    })
}

/// Convert a hex string into bytes. Whitespace between bytes is ignored.
pub fn parse_hex_payload(data: &str) -> Result<Vec<u8>, DeviceError> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(compact)?)
}
