//! In-memory BLE connector for tests.

use crate::error::DeviceError;
use crate::infrastructure::bluetooth::connection::{BleConnector, GattLink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    Fail,
    Hang,
}

#[derive(Debug)]
struct FakeState {
    behavior: ConnectBehavior,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>, bool)>>,
}

#[derive(Debug, Clone)]
pub struct FakeConnector {
    address: String,
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new(address: &str) -> Self {
        Self::with_behavior(address, ConnectBehavior::Succeed)
    }

    pub fn with_behavior(address: &str, behavior: ConnectBehavior) -> Self {
        Self {
            address: address.to_uppercase(),
            state: Arc::new(FakeState {
                behavior,
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                values: Mutex::new(HashMap::new()),
                writes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_value(self, uuid: Uuid, value: &[u8]) -> Self {
        self.state
            .values
            .lock()
            .unwrap()
            .insert(uuid, value.to_vec());
        self
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, bool)> {
        self.state.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BleConnector for FakeConnector {
    type Link = FakeLink;

    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self, connect_timeout: Duration) -> Result<FakeLink, DeviceError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        // let concurrent callers pile up on the device lock
        tokio::time::sleep(Duration::from_millis(5)).await;
        match self.state.behavior {
            ConnectBehavior::Succeed => Ok(FakeLink {
                state: self.state.clone(),
            }),
            ConnectBehavior::Fail => Err(DeviceError::ConnectFailed(
                btleplug::Error::DeviceNotFound,
            )),
            ConnectBehavior::Hang => {
                tokio::time::sleep(connect_timeout).await;
                Err(DeviceError::ConnectTimeout)
            }
        }
    }
}

#[derive(Debug)]
pub struct FakeLink {
    state: Arc<FakeState>,
}

#[async_trait]
impl GattLink for FakeLink {
    async fn write_gatt_char(
        &self,
        uuid: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), DeviceError> {
        self.state
            .writes
            .lock()
            .unwrap()
            .push((uuid, data.to_vec(), with_response));
        self.state
            .values
            .lock()
            .unwrap()
            .insert(uuid, data.to_vec());
        Ok(())
    }

    async fn read_gatt_char(&self, uuid: Uuid) -> Result<Vec<u8>, DeviceError> {
        self.state
            .values
            .lock()
            .unwrap()
            .get(&uuid)
            .cloned()
            .ok_or(DeviceError::CharacteristicNotFound { uuid })
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
