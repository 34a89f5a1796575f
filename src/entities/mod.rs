//! Entities
//!
//! Project device state into the records published to clients: a
//! connectivity binary sensor and a manufacturer data sensor. Both share
//! [`EntityBase`].

pub mod binary_sensor;
pub mod sensor;

use crate::domain::models::{ConfigEntry, DeviceInfo, EntityState};
use crate::infrastructure::bluetooth::connection::BleConnector;
use crate::infrastructure::bluetooth::coordinator::PassiveCoordinator;
use crate::infrastructure::bluetooth::device::GenericBtDevice;
use serde_json::{Map, Value};
use std::sync::Arc;

pub use binary_sensor::GenericBtBinarySensor;
pub use sensor::ManufacturerDataSensor;

pub const CONNECTION_BLUETOOTH: &str = "bluetooth";

/// Anything that can publish an [`EntityState`]
pub trait Entity: Send + Sync {
    fn state(&self) -> EntityState;
}

/// Common entity plumbing
pub struct EntityBase<C: BleConnector> {
    coordinator: Arc<PassiveCoordinator<C>>,
    unique_id: String,
    device_info: DeviceInfo,
}

impl<C: BleConnector> EntityBase<C> {
    pub fn new(coordinator: Arc<PassiveCoordinator<C>>, entry: &ConfigEntry) -> Self {
        let device_info = DeviceInfo {
            connections: vec![(
                CONNECTION_BLUETOOTH.to_string(),
                coordinator.address().to_string(),
            )],
            name: coordinator.device_name().to_string(),
        };
        Self {
            coordinator,
            unique_id: entry.unique_id.clone(),
            device_info,
        }
    }

    pub fn device(&self) -> &Arc<GenericBtDevice<C>> {
        self.coordinator.device()
    }

    /// Manufacturer data mapping plus its `manufacturer_id`, when known
    pub fn manufacturer_attributes(&self) -> Map<String, Value> {
        let data = self.device().manufacturer_data();
        let mut attributes = data.to_attributes();
        if let Some(id) = data.manufacturer_id() {
            attributes.insert("manufacturer_id".into(), id.into());
        }
        attributes
    }

    /// `<platform>.<slugified address><suffix>`
    pub fn entity_id(&self, platform: &str, suffix: &str) -> String {
        let slug = self
            .coordinator
            .address()
            .to_lowercase()
            .replace([':', '-'], "_");
        format!("{platform}.generic_bt_{slug}{suffix}")
    }

    pub fn build_state(
        &self,
        entity_id: String,
        name: Option<&str>,
        state: Value,
        attributes: Map<String, Value>,
        icon: Option<&str>,
    ) -> EntityState {
        EntityState {
            entity_id,
            unique_id: self.unique_id.clone(),
            name: name.map(str::to_string),
            state,
            attributes,
            icon: icon.map(str::to_string),
            device_info: self.device_info.clone(),
        }
    }
}
