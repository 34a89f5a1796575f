use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Snapshot of one advertisement as seen by the scanner
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceInfo {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

impl ServiceInfo {
    pub fn first_manufacturer_data(&self) -> Option<(u16, &[u8])> {
        self.manufacturer_data
            .iter()
            .next()
            .map(|(id, payload)| (*id, payload.as_slice()))
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.address)
    }
}

/// A configured device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    /// BLE address, used to refuse configuring the same device twice
    pub unique_id: String,
    pub title: String,
    pub address: String,
}

impl ConfigEntry {
    pub fn new(title: impl Into<String>, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            entry_id: uuid::Uuid::new_v4().simple().to_string(),
            unique_id: address.clone(),
            title: title.into(),
            address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// `(connection type, identifier)` pairs
    pub connections: Vec<(String, String)>,
    pub name: String,
}

/// State published for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub unique_id: String,
    pub name: Option<String>,
    pub state: Value,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub icon: Option<String>,
    pub device_info: DeviceInfo,
}
