//! Passive Coordinator
//!
//! Feeds advertisements for one address into its device and tells entity
//! listeners when the device state changed. Never opens a connection.

use crate::domain::models::ServiceInfo;
use crate::infrastructure::bluetooth::connection::BleConnector;
use crate::infrastructure::bluetooth::device::GenericBtDevice;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct PassiveCoordinator<C: BleConnector> {
    address: String,
    device_name: String,
    device: Arc<GenericBtDevice<C>>,
    ready: watch::Sender<bool>,
    updates: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: BleConnector> PassiveCoordinator<C> {
    pub fn new(device: Arc<GenericBtDevice<C>>, device_name: impl Into<String>) -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        let (updates, _) = broadcast::channel(16);
        Arc::new(Self {
            address: device.address().to_uppercase(),
            device_name: device_name.into(),
            device,
            ready,
            updates,
            task: Mutex::new(None),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device(&self) -> &Arc<GenericBtDevice<C>> {
        &self.device
    }

    /// Notified after every advertisement applied to the device
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.updates.subscribe()
    }

    /// Apply one advertisement. Advertisements for other addresses are ignored.
    pub fn handle_advertisement(&self, info: &ServiceInfo) {
        if !info.address.eq_ignore_ascii_case(&self.address) {
            return;
        }

        match self.device.update_from_advertisement(info) {
            Ok(true) => debug!(address = %self.address, "Manufacturer data updated"),
            Ok(false) => {}
            Err(e) => warn!(address = %self.address, error = %e, "Ignoring advertisement"),
        }

        self.ready.send_if_modified(|ready| !std::mem::replace(ready, true));
        let _ = self.updates.send(());
    }

    /// Start listening. Stops on its own when the advertisement feed closes.
    pub fn start(self: &Arc<Self>, mut advertisements: broadcast::Receiver<ServiceInfo>) {
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match advertisements.recv().await {
                    Ok(info) => coordinator.handle_advertisement(&info),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(address = %coordinator.address, skipped, "Advertisement feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(address = %coordinator.address, "Coordinator stopped");
        });

        if let Some(previous) = self.replace_task(Some(handle)) {
            previous.abort();
        }
        info!(address = %self.address, "Coordinator started");
    }

    /// Wait until the first advertisement has been seen.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.subscribe();
        let seen = matches!(
            tokio::time::timeout(timeout, ready.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        seen
    }

    pub fn stop(&self) {
        if let Some(handle) = self.replace_task(None) {
            handle.abort();
        }
    }

    fn replace_task(&self, handle: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut task = match self.task.lock() {
            Ok(task) => task,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *task, handle)
    }
}
