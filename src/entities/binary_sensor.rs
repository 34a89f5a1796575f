//! Connectivity binary sensor
//!
//! On while the device holds a GATT connection. Carries the `write_gatt`
//! and `read_gatt` services.

use crate::domain::manufacturer::ManufacturerData;
use crate::domain::models::{ConfigEntry, EntityState};
use crate::entities::{Entity, EntityBase};
use crate::error::DeviceError;
use crate::infrastructure::bluetooth::connection::BleConnector;
use crate::infrastructure::bluetooth::coordinator::PassiveCoordinator;
use serde_json::Value;
use std::sync::Arc;

pub const SERVICE_WRITE_GATT: &str = "write_gatt";
pub const SERVICE_READ_GATT: &str = "read_gatt";

pub struct GenericBtBinarySensor<C: BleConnector> {
    base: EntityBase<C>,
}

impl<C: BleConnector> GenericBtBinarySensor<C> {
    /// Vendor manufacturer formats only get the manufacturer data sensor.
    pub fn should_create(data: &ManufacturerData) -> bool {
        !data.format().is_some_and(|format| format.is_vendor())
    }

    pub fn new(coordinator: Arc<PassiveCoordinator<C>>, entry: &ConfigEntry) -> Self {
        Self {
            base: EntityBase::new(coordinator, entry),
        }
    }

    pub fn is_on(&self) -> bool {
        self.base.device().connected()
    }

    /// Returns the state to publish once the write went through.
    pub async fn write_gatt(
        &self,
        target_uuid: &str,
        data: &str,
    ) -> Result<EntityState, DeviceError> {
        self.base.device().write_gatt(target_uuid, data).await?;
        Ok(self.state())
    }

    pub async fn read_gatt(
        &self,
        target_uuid: &str,
    ) -> Result<(Vec<u8>, EntityState), DeviceError> {
        let value = self.base.device().read_gatt(target_uuid).await?;
        Ok((value, self.state()))
    }
}

impl<C: BleConnector> Entity for GenericBtBinarySensor<C> {
    fn state(&self) -> EntityState {
        let state = if self.is_on() { "on" } else { "off" };
        self.base.build_state(
            self.base.entity_id("binary_sensor", ""),
            None,
            Value::from(state),
            self.base.manufacturer_attributes(),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manufacturer::{decode, SKIP_HEADER_ID, TAGGED_ID};
    use crate::entities::test_support::{coordinator, entry, ADDRESS};
    use crate::infrastructure::bluetooth::testing::FakeConnector;

    const CHAR_UUID: &str = "0000fff1-0000-1000-8000-00805f9b34fb";

    fn decoded(id: u16) -> ManufacturerData {
        ManufacturerData::Decoded(decode(id, &[0u8; 19]).unwrap())
    }

    #[test]
    fn created_only_for_non_vendor_formats() {
        type Sensor = GenericBtBinarySensor<FakeConnector>;
        assert!(Sensor::should_create(&ManufacturerData::unseen(ADDRESS)));
        assert!(Sensor::should_create(&decoded(89)));
        assert!(!Sensor::should_create(&decoded(SKIP_HEADER_ID)));
        assert!(!Sensor::should_create(&decoded(TAGGED_ID)));
    }

    #[tokio::test]
    async fn state_follows_connection() {
        let connector = FakeConnector::new(ADDRESS);
        let sensor = GenericBtBinarySensor::new(coordinator(connector.clone()), &entry());
        assert_eq!(sensor.state().state, "off");
        assert_eq!(sensor.state().entity_id, "binary_sensor.generic_bt_aa_bb_cc_dd_ee_ff");

        let state = sensor.write_gatt(CHAR_UUID, "beef").await.unwrap();
        assert_eq!(state.state, "on");
        assert!(sensor.is_on());

        let (value, _) = sensor.read_gatt(CHAR_UUID).await.unwrap();
        assert_eq!(value, vec![0xbe, 0xef]);
        assert_eq!(connector.connect_count(), 1);
    }
}
