//! Generic BT Device
//!
//! Wraps one discovered BLE device: a lazily opened GATT connection guarded
//! by a single async mutex, and the last decoded manufacturer data.

use crate::domain::manufacturer::{DecodeError, ManufacturerData};
use crate::domain::models::ServiceInfo;
use crate::error::DeviceError;
use crate::infrastructure::bluetooth::connection::{BleConnector, GattLink};
use crate::infrastructure::bluetooth::protocol;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct GenericBtDevice<C: BleConnector> {
    connector: C,
    connect_timeout: Duration,
    // at most one connection attempt at a time; GATT calls serialize here
    client: Mutex<Option<C::Link>>,
    connected: AtomicBool,
    manufacturer_data: RwLock<ManufacturerData>,
}

impl<C: BleConnector> GenericBtDevice<C> {
    pub fn new(connector: C, connect_timeout: Duration) -> Self {
        let manufacturer_data = ManufacturerData::unseen(connector.address());
        Self {
            connector,
            connect_timeout,
            client: Mutex::new(None),
            connected: AtomicBool::new(false),
            manufacturer_data: RwLock::new(manufacturer_data),
        }
    }

    pub fn address(&self) -> &str {
        self.connector.address()
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn manufacturer_data(&self) -> ManufacturerData {
        match self.manufacturer_data.read() {
            Ok(data) => data.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the manufacturer data mapping.
    pub fn set_manufacturer_data(&self, data: ManufacturerData) {
        match self.manufacturer_data.write() {
            Ok(mut current) => *current = data,
            Err(poisoned) => *poisoned.into_inner() = data,
        }
    }

    /// Decode the advertisement and replace the mapping with the result.
    ///
    /// Returns `Ok(false)` when the advertisement carries no manufacturer
    /// data, in which case the mapping is left alone.
    pub fn update_from_advertisement(&self, info: &ServiceInfo) -> Result<bool, DecodeError> {
        match ManufacturerData::from_service_info(info)? {
            Some(data) => {
                self.set_manufacturer_data(data);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Make sure `slot` holds a link, connecting if it does not.
    async fn get_client<'a>(
        &self,
        slot: &'a mut Option<C::Link>,
    ) -> Result<&'a C::Link, DeviceError> {
        let link = match slot.take() {
            Some(link) => {
                debug!(address = %self.address(), "Connection reused");
                link
            }
            None => {
                debug!(address = %self.address(), "Connecting");
                let link = self.connector.connect(self.connect_timeout).await?;
                self.connected.store(true, Ordering::SeqCst);
                link
            }
        };
        Ok(slot.insert(link))
    }

    /// Write a hex payload to the characteristic `target_uuid`, with response.
    pub async fn write_gatt(&self, target_uuid: &str, data: &str) -> Result<(), DeviceError> {
        let uuid = protocol::parse_uuid(target_uuid)?;
        let bytes = protocol::parse_hex_payload(data)?;

        let mut client = self.client.lock().await;
        let link = self.get_client(&mut client).await?;
        debug!(address = %self.address(), %uuid, len = bytes.len(), "Writing characteristic");
        link.write_gatt_char(uuid, &bytes, true).await
    }

    pub async fn read_gatt(&self, target_uuid: &str) -> Result<Vec<u8>, DeviceError> {
        let uuid = protocol::parse_uuid(target_uuid)?;

        let mut client = self.client.lock().await;
        let link = self.get_client(&mut client).await?;
        let value = link.read_gatt_char(uuid).await?;
        debug!(address = %self.address(), %uuid, value = %hex::encode(&value), "Read characteristic");
        Ok(value)
    }

    /// Drop the held connection, if any.
    pub async fn stop(&self) {
        let mut client = self.client.lock().await;
        if let Some(link) = client.take() {
            if let Err(e) = link.disconnect().await {
                warn!(address = %self.address(), error = %e, "Failed to disconnect cleanly");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}
