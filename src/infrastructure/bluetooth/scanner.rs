//! BLE Scanner Module
//!
//! Listens to the `btleplug` central event stream, records every device in
//! the discovery registry and broadcasts its advertisement.

use crate::domain::models::ServiceInfo;
use crate::infrastructure::bluetooth::connection::PeripheralConnector;
use crate::infrastructure::bluetooth::registry::DiscoveryRegistry;
use anyhow::Result;
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace};

pub type PeripheralRegistry = DiscoveryRegistry<PeripheralConnector>;

/// BLE Scanner feeding the discovery registry
pub struct BleScanner {
    adapter: Adapter,
    registry: Arc<PeripheralRegistry>,
    advertisements: broadcast::Sender<ServiceInfo>,
    task: Option<JoinHandle<()>>,
}

impl BleScanner {
    /// Create a scanner on the first available adapter
    pub async fn new(
        registry: Arc<PeripheralRegistry>,
        advertisements: broadcast::Sender<ServiceInfo>,
    ) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapters found"))?;
        info!("Using Bluetooth adapter: {}", adapter.adapter_info().await?);

        Ok(Self {
            adapter,
            registry,
            advertisements,
            task: None,
        })
    }

    /// Start passive scanning for every device
    pub async fn start(&mut self) -> Result<()> {
        // Stop any existing scan
        self.stop().await?;

        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("Starting BLE scan");

        let adapter = self.adapter.clone();
        let registry = self.registry.clone();
        let sender = self.advertisements.clone();
        self.task = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                handle_event(&adapter, event, &registry, &sender).await;
            }
            debug!("BLE event stream ended");
        }));

        Ok(())
    }

    /// Stop scanning
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            info!("Stopping BLE scan...");
            task.abort();
            self.adapter.stop_scan().await?;
        }
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn handle_event(
    adapter: &Adapter,
    event: CentralEvent,
    registry: &PeripheralRegistry,
    sender: &broadcast::Sender<ServiceInfo>,
) {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            trace!("Device seen: {:?}", id);
            process_peripheral(adapter, &id, registry, sender).await;
        }
        CentralEvent::ManufacturerDataAdvertisement { id, .. } => {
            trace!("Manufacturer data advertisement: {:?}", id);
            process_peripheral(adapter, &id, registry, sender).await;
        }
        _ => {}
    }
}

async fn process_peripheral(
    adapter: &Adapter,
    id: &PeripheralId,
    registry: &PeripheralRegistry,
    sender: &broadcast::Sender<ServiceInfo>,
) {
    let peripheral = match adapter.peripheral(id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return,
    };

    let info = service_info_from_properties(&properties);
    registry.record(PeripheralConnector::new(peripheral), info.clone());
    // no receivers just means nothing is set up yet
    let _ = sender.send(info);
}

pub fn service_info_from_properties(properties: &PeripheralProperties) -> ServiceInfo {
    ServiceInfo {
        address: properties.address.to_string().to_uppercase(),
        name: properties.local_name.clone(),
        rssi: properties.rssi,
        manufacturer_data: properties
            .manufacturer_data
            .iter()
            .map(|(id, payload)| (*id, payload.clone()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::api::BDAddr;
    use std::collections::HashMap;

    #[test]
    fn properties_become_service_info() {
        let properties = PeripheralProperties {
            address: BDAddr::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            local_name: Some("Thermo".into()),
            rssi: Some(-61),
            manufacturer_data: HashMap::from([(1076, vec![1, 2, 3]), (89, vec![4])]),
            ..Default::default()
        };

        let info = service_info_from_properties(&properties);
        assert_eq!(info.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(info.name.as_deref(), Some("Thermo"));
        assert_eq!(info.rssi, Some(-61));
        assert_eq!(info.first_manufacturer_data(), Some((89, &[4u8][..])));
    }
}
