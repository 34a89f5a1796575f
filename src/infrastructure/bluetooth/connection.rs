//! BLE Connection Module
//!
//! The seam between the device wrapper and the BLE stack: a [`BleConnector`]
//! opens a [`GattLink`], which reads and writes characteristics. The
//! `btleplug` implementation lives here too.

use crate::error::DeviceError;
use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

/// An open GATT connection
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn write_gatt_char(
        &self,
        uuid: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), DeviceError>;

    async fn read_gatt_char(&self, uuid: Uuid) -> Result<Vec<u8>, DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;
}

/// Handle to a discovered device that can open a [`GattLink`]
#[async_trait]
pub trait BleConnector: Clone + Send + Sync + 'static {
    type Link: GattLink + 'static;

    /// BLE address, upper-case colon separated
    fn address(&self) -> &str;

    /// Connect, failing with [`DeviceError::ConnectTimeout`] when
    /// `connect_timeout` elapses and [`DeviceError::ConnectFailed`] on a link
    /// error.
    async fn connect(&self, connect_timeout: Duration) -> Result<Self::Link, DeviceError>;
}

/// `btleplug` peripheral handle
#[derive(Debug, Clone)]
pub struct PeripheralConnector {
    peripheral: Peripheral,
    address: String,
}

impl PeripheralConnector {
    pub fn new(peripheral: Peripheral) -> Self {
        let address = peripheral.address().to_string().to_uppercase();
        Self {
            peripheral,
            address,
        }
    }
}

#[async_trait]
impl BleConnector for PeripheralConnector {
    type Link = PeripheralLink;

    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self, connect_timeout: Duration) -> Result<PeripheralLink, DeviceError> {
        info!(address = %self.address, "Connecting to BLE device");

        let attempt = async {
            if !self.peripheral.is_connected().await? {
                self.peripheral.connect().await?;
            }
            self.peripheral.discover_services().await?;
            Ok::<_, btleplug::Error>(())
        };

        match timeout(connect_timeout, attempt).await {
            Ok(Ok(())) => {
                info!(
                    address = %self.address,
                    characteristics = self.peripheral.characteristics().len(),
                    "Device connected"
                );
                Ok(PeripheralLink {
                    peripheral: self.peripheral.clone(),
                })
            }
            Ok(Err(btleplug::Error::TimedOut(_))) | Err(_) => {
                debug!(address = %self.address, "Timeout on connect");
                Err(DeviceError::ConnectTimeout)
            }
            Ok(Err(e)) => {
                debug!(address = %self.address, error = %e, "Error on connect");
                Err(DeviceError::ConnectFailed(e))
            }
        }
    }
}

/// Connected `btleplug` peripheral
#[derive(Debug)]
pub struct PeripheralLink {
    peripheral: Peripheral,
}

impl PeripheralLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, DeviceError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(DeviceError::CharacteristicNotFound { uuid })
    }
}

#[async_trait]
impl GattLink for PeripheralLink {
    async fn write_gatt_char(
        &self,
        uuid: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), DeviceError> {
        let characteristic = self.characteristic(uuid)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral
            .write(&characteristic, data, write_type)
            .await?;
        Ok(())
    }

    async fn read_gatt_char(&self, uuid: Uuid) -> Result<Vec<u8>, DeviceError> {
        let characteristic = self.characteristic(uuid)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}
