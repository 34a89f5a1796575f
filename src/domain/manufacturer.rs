//! Manufacturer Data Decoding
//!
//! Turns the vendor payload carried in a BLE advertisement into the record
//! exposed as entity state. Two manufacturer identifiers get special
//! treatment; every other identifier is passed through as plain hex.

use crate::domain::models::ServiceInfo;
use serde_json::{Map, Value};
use std::ops::Range;
use thiserror::Error;

/// Manufacturer whose payload starts with a six byte header that is dropped
pub const SKIP_HEADER_ID: u16 = 1076;

/// Manufacturer whose payload embeds a MAC address and, when tagged, a size
pub const TAGGED_ID: u16 = 65535;

/// Byte value at [`SIZE_MARKER_OFFSET`] announcing a size reading
pub const SIZE_MARKER: u8 = 0x25;

const SKIP_HEADER_LEN: usize = 6;
const SIZE_MARKER_OFFSET: usize = 15;
const MAC_RANGE: Range<usize> = 2..8;
const SIZE_LOW: usize = 17;
const SIZE_HIGH: usize = 18;
const SIZE_SCALE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error(
        "manufacturer {manufacturer_id} payload too short: need {needed} bytes, got {actual}"
    )]
    Truncated {
        manufacturer_id: u16,
        needed: usize,
        actual: usize,
    },
}

/// Payload layout, keyed by manufacturer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManufacturerFormat {
    /// Header bytes are dropped, the rest is hex encoded
    SkipHeader,
    /// Full payload plus an embedded MAC address and optional size
    Tagged,
    /// Full payload, untouched
    Raw,
}

impl ManufacturerFormat {
    pub fn for_id(manufacturer_id: u16) -> Self {
        match manufacturer_id {
            SKIP_HEADER_ID => Self::SkipHeader,
            TAGGED_ID => Self::Tagged,
            _ => Self::Raw,
        }
    }

    /// Vendor formats get a manufacturer data sensor only, no connectivity
    /// sensor and no GATT services.
    pub fn is_vendor(self) -> bool {
        !matches!(self, Self::Raw)
    }
}

/// One decoded manufacturer data entry
#[derive(Debug, Clone, PartialEq)]
pub struct ManufacturerRecord {
    pub manufacturer_id: u16,
    /// Hex encoded payload (header stripped for [`ManufacturerFormat::SkipHeader`])
    pub data: String,
    pub mac_address: Option<String>,
    pub size: Option<f64>,
}

/// Decode a raw manufacturer payload.
///
/// ```text
/// 1076  : hex(payload[6..])
/// 65535 : hex(payload), mac = hex(payload[2..8])
///         if payload[15] == 0x25: size = u16_le(payload[17..19]) / 100
/// other : hex(payload)
/// ```
pub fn decode(manufacturer_id: u16, payload: &[u8]) -> Result<ManufacturerRecord, DecodeError> {
    match ManufacturerFormat::for_id(manufacturer_id) {
        ManufacturerFormat::SkipHeader => Ok(ManufacturerRecord {
            manufacturer_id,
            data: hex::encode(payload.get(SKIP_HEADER_LEN..).unwrap_or_default()),
            mac_address: None,
            size: None,
        }),
        ManufacturerFormat::Tagged => decode_tagged(manufacturer_id, payload),
        ManufacturerFormat::Raw => Ok(ManufacturerRecord {
            manufacturer_id,
            data: hex::encode(payload),
            mac_address: None,
            size: None,
        }),
    }
}

fn decode_tagged(manufacturer_id: u16, payload: &[u8]) -> Result<ManufacturerRecord, DecodeError> {
    let marker = *payload
        .get(SIZE_MARKER_OFFSET)
        .ok_or(DecodeError::Truncated {
            manufacturer_id,
            needed: SIZE_MARKER_OFFSET + 1,
            actual: payload.len(),
        })?;

    let size = if marker == SIZE_MARKER {
        if payload.len() <= SIZE_HIGH {
            return Err(DecodeError::Truncated {
                manufacturer_id,
                needed: SIZE_HIGH + 1,
                actual: payload.len(),
            });
        }
        let raw = u16::from_le_bytes([payload[SIZE_LOW], payload[SIZE_HIGH]]);
        Some(f64::from(raw) / SIZE_SCALE)
    } else {
        None
    };

    Ok(ManufacturerRecord {
        manufacturer_id,
        data: hex::encode(payload),
        mac_address: Some(hex::encode(&payload[MAC_RANGE])),
        size,
    })
}

/// Manufacturer data mapping held by a device.
///
/// Replaced wholesale on every observation, never merged.
#[derive(Debug, Clone, PartialEq)]
pub enum ManufacturerData {
    /// Nothing decoded yet; only the device address is known
    Unseen { device_address: String },
    Decoded(ManufacturerRecord),
}

impl ManufacturerData {
    pub fn unseen(device_address: impl Into<String>) -> Self {
        Self::Unseen {
            device_address: device_address.into(),
        }
    }

    /// Decode the lowest-numbered manufacturer entry of an advertisement.
    ///
    /// Returns `Ok(None)` when the advertisement carries no manufacturer data.
    pub fn from_service_info(info: &ServiceInfo) -> Result<Option<Self>, DecodeError> {
        match info.first_manufacturer_data() {
            Some((manufacturer_id, payload)) => {
                decode(manufacturer_id, payload).map(|record| Some(Self::Decoded(record)))
            }
            None => Ok(None),
        }
    }

    pub fn manufacturer_id(&self) -> Option<u16> {
        match self {
            Self::Unseen { .. } => None,
            Self::Decoded(record) => Some(record.manufacturer_id),
        }
    }

    pub fn format(&self) -> Option<ManufacturerFormat> {
        self.manufacturer_id().map(ManufacturerFormat::for_id)
    }

    /// Flat key/value view, keyed by manufacturer id for the hex payload.
    pub fn to_attributes(&self) -> Map<String, Value> {
        let mut attributes = Map::new();
        match self {
            Self::Unseen { device_address } => {
                attributes.insert("device_address".into(), device_address.clone().into());
            }
            Self::Decoded(record) => {
                attributes.insert(
                    record.manufacturer_id.to_string(),
                    record.data.clone().into(),
                );
                if let Some(mac) = &record.mac_address {
                    attributes.insert("mac_address".into(), mac.clone().into());
                }
                if let Some(size) = record.size {
                    attributes.insert("size".into(), size.into());
                }
            }
        }
        attributes
    }
}
