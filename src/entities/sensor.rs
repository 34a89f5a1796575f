//! Manufacturer data sensor

use crate::domain::models::{ConfigEntry, EntityState};
use crate::entities::{Entity, EntityBase};
use crate::infrastructure::bluetooth::connection::BleConnector;
use crate::infrastructure::bluetooth::coordinator::PassiveCoordinator;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const NAME: &str = "Manufacturer Data";
pub const ICON: &str = "mdi:bluetooth";

pub struct ManufacturerDataSensor<C: BleConnector> {
    base: EntityBase<C>,
}

impl<C: BleConnector> ManufacturerDataSensor<C> {
    pub fn new(coordinator: Arc<PassiveCoordinator<C>>, entry: &ConfigEntry) -> Self {
        Self {
            base: EntityBase::new(coordinator, entry),
        }
    }

    pub fn native_value(&self) -> Map<String, Value> {
        self.base.manufacturer_attributes()
    }
}

impl<C: BleConnector> Entity for ManufacturerDataSensor<C> {
    fn state(&self) -> EntityState {
        let value = self.native_value();
        let mut attributes = Map::new();
        attributes.insert("manufacturer_data".into(), Value::Object(value.clone()));
        self.base.build_state(
            self.base.entity_id("sensor", "_manufacturer_data"),
            Some(NAME),
            Value::Object(value),
            attributes,
            Some(ICON),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manufacturer::TAGGED_ID;
    use crate::domain::models::ServiceInfo;
    use crate::entities::test_support::{coordinator, entry, ADDRESS};
    use crate::infrastructure::bluetooth::testing::FakeConnector;
    use std::collections::BTreeMap;

    #[test]
    fn value_tracks_latest_advertisement() {
        let coordinator = coordinator(FakeConnector::new(ADDRESS));
        let sensor = ManufacturerDataSensor::new(coordinator.clone(), &entry());

        let state = sensor.state();
        assert_eq!(state.name.as_deref(), Some("Manufacturer Data"));
        assert_eq!(state.icon.as_deref(), Some("mdi:bluetooth"));
        assert_eq!(state.state["device_address"], ADDRESS);

        let mut payload = vec![0u8; 19];
        payload[2..8].copy_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        payload[15] = 0x25;
        payload[17] = 0x10;
        payload[18] = 0x27;
        coordinator.handle_advertisement(&ServiceInfo {
            address: ADDRESS.into(),
            manufacturer_data: BTreeMap::from([(TAGGED_ID, payload)]),
            ..Default::default()
        });

        let state = sensor.state();
        assert_eq!(state.state["mac_address"], "112233445566");
        assert_eq!(state.state["size"], 100.0);
        assert_eq!(state.state["manufacturer_id"], 65535);
        assert!(state.state.get("device_address").is_none());
        assert_eq!(state.attributes["manufacturer_data"], state.state);
    }
}
