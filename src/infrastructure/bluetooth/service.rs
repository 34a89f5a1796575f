//! Bluetooth Service Module
//!
//! Sets up and tears down config entries: resolves the device handle from
//! the discovery registry, starts a passive coordinator, creates entities
//! and routes the GATT services to them.

use crate::domain::manufacturer::ManufacturerData;
use crate::domain::models::{ConfigEntry, EntityState, ServiceInfo};
use crate::entities::binary_sensor::{SERVICE_READ_GATT, SERVICE_WRITE_GATT};
use crate::entities::{Entity, GenericBtBinarySensor, ManufacturerDataSensor};
use crate::error::{ServiceError, SetupError};
use crate::infrastructure::bluetooth::connection::BleConnector;
use crate::infrastructure::bluetooth::coordinator::PassiveCoordinator;
use crate::infrastructure::bluetooth::device::GenericBtDevice;
use crate::infrastructure::bluetooth::registry::DiscoveryRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SetupOptions {
    pub connect_timeout: Duration,
    pub ready_timeout: Duration,
    /// Delay between setup attempts while a device is not ready
    pub retry_interval: Duration,
}

/// Everything created for one loaded entry
struct LoadedEntry<C: BleConnector> {
    entry: ConfigEntry,
    coordinator: Arc<PassiveCoordinator<C>>,
    binary_sensor: Option<Arc<GenericBtBinarySensor<C>>>,
    sensor: Arc<ManufacturerDataSensor<C>>,
    listener: JoinHandle<()>,
}

impl<C: BleConnector> LoadedEntry<C> {
    fn states(&self) -> Vec<EntityState> {
        entity_states(self.binary_sensor.as_deref(), &self.sensor)
    }
}

fn entity_states<C: BleConnector>(
    binary_sensor: Option<&GenericBtBinarySensor<C>>,
    sensor: &ManufacturerDataSensor<C>,
) -> Vec<EntityState> {
    let mut states = Vec::with_capacity(2);
    if let Some(binary_sensor) = binary_sensor {
        states.push(binary_sensor.state());
    }
    states.push(sensor.state());
    states
}

/// Owns the loaded entries and the shared discovery context
pub struct BluetoothService<C: BleConnector> {
    registry: Arc<DiscoveryRegistry<C>>,
    advertisements: broadcast::Sender<ServiceInfo>,
    states: broadcast::Sender<EntityState>,
    options: SetupOptions,
    entries: RwLock<HashMap<String, LoadedEntry<C>>>,
    retries: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl<C: BleConnector> BluetoothService<C> {
    pub fn new(
        registry: Arc<DiscoveryRegistry<C>>,
        advertisements: broadcast::Sender<ServiceInfo>,
        options: SetupOptions,
    ) -> Self {
        let (states, _) = broadcast::channel(64);
        Self {
            registry,
            advertisements,
            states,
            options,
            entries: RwLock::new(HashMap::new()),
            retries: Mutex::new(HashMap::new()),
        }
    }

    /// State changes published by loaded entities
    pub fn subscribe_states(&self) -> broadcast::Receiver<EntityState> {
        self.states.subscribe()
    }

    /// Set up one config entry.
    pub async fn setup_entry(&self, entry: ConfigEntry) -> Result<(), SetupError> {
        if self.entries.read().await.contains_key(&entry.entry_id) {
            return Err(SetupError::AlreadyLoaded(entry.entry_id));
        }

        let address = entry.address.to_uppercase();
        let connector = self
            .registry
            .ble_device_from_address(&address)
            .ok_or_else(|| {
                SetupError::NotReady(format!(
                    "Could not find Generic BT Device with address {address}"
                ))
            })?;
        let device = Arc::new(GenericBtDevice::new(connector, self.options.connect_timeout));

        if let Some(info) = self.registry.last_service_info(&address) {
            match ManufacturerData::from_service_info(&info) {
                Ok(Some(data)) => device.set_manufacturer_data(data),
                Ok(None) => {}
                Err(e) => warn!(%address, error = %e, "Ignoring last advertisement"),
            }
        }

        let coordinator = PassiveCoordinator::new(device, entry.title.clone());
        coordinator.start(self.advertisements.subscribe());

        if !coordinator.wait_ready(self.options.ready_timeout).await {
            coordinator.stop();
            return Err(SetupError::NotReady(format!(
                "{address} is not advertising state"
            )));
        }

        let binary_sensor = GenericBtBinarySensor::<C>::should_create(
            &coordinator.device().manufacturer_data(),
        )
        .then(|| Arc::new(GenericBtBinarySensor::new(coordinator.clone(), &entry)));
        let sensor = Arc::new(ManufacturerDataSensor::new(coordinator.clone(), &entry));

        let listener = self.spawn_state_listener(&coordinator, binary_sensor.clone(), sensor.clone());

        info!(
            %address,
            title = %entry.title,
            services = binary_sensor.is_some(),
            "Entry set up"
        );

        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.entry_id) {
            // a concurrent setup of the same entry won
            listener.abort();
            coordinator.stop();
            return Err(SetupError::AlreadyLoaded(entry.entry_id));
        }
        let loaded = LoadedEntry {
            entry,
            coordinator,
            binary_sensor,
            sensor,
            listener,
        };
        for state in loaded.states() {
            let _ = self.states.send(state);
        }
        entries.insert(loaded.entry.entry_id.clone(), loaded);
        Ok(())
    }

    /// Keep setting up `entry` in the background until it is loaded.
    ///
    /// Replaces any retry already pending for the same entry.
    pub fn spawn_setup_retry(self: &Arc<Self>, entry: ConfigEntry) {
        let service = Arc::clone(self);
        let entry_id = entry.entry_id.clone();
        let handle = tokio::spawn(async move { service.setup_with_retry(entry).await });
        if let Some(previous) = self.lock_retries().insert(entry_id, handle) {
            previous.abort();
        }
    }

    async fn setup_with_retry(&self, entry: ConfigEntry) {
        loop {
            match self.setup_entry(entry.clone()).await {
                Ok(()) => return,
                Err(SetupError::NotReady(reason)) => {
                    warn!(
                        address = %entry.address,
                        "{}; retrying in {:?}",
                        reason,
                        self.options.retry_interval
                    );
                    tokio::time::sleep(self.options.retry_interval).await;
                }
                Err(e) => {
                    warn!(address = %entry.address, "Setup stopped: {}", e);
                    return;
                }
            }
        }
    }

    fn cancel_retry(&self, entry_id: &str) {
        if let Some(handle) = self.lock_retries().remove(entry_id) {
            handle.abort();
        }
    }

    fn lock_retries(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        match self.retries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publish entity states after every coordinator update.
    fn spawn_state_listener(
        &self,
        coordinator: &PassiveCoordinator<C>,
        binary_sensor: Option<Arc<GenericBtBinarySensor<C>>>,
        sensor: Arc<ManufacturerDataSensor<C>>,
    ) -> JoinHandle<()> {
        let mut updates = coordinator.subscribe();
        let states = self.states.clone();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        for state in entity_states(binary_sensor.as_deref(), &sensor) {
                            let _ = states.send(state);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Unload an entry and cancel any pending setup retry. Returns false if
    /// it was not loaded.
    pub async fn unload_entry(&self, entry_id: &str) -> bool {
        self.cancel_retry(entry_id);
        let Some(loaded) = self.entries.write().await.remove(entry_id) else {
            return false;
        };
        loaded.listener.abort();
        loaded.coordinator.stop();
        loaded.coordinator.device().stop().await;
        info!(address = %loaded.coordinator.address(), "Entry unloaded");
        true
    }

    /// Unload and set up again, e.g. after the entry changed.
    ///
    /// A device that is not ready is handed to the background retry; the
    /// `NotReady` error is still returned.
    pub async fn reload_entry(self: &Arc<Self>, entry: ConfigEntry) -> Result<(), SetupError> {
        self.unload_entry(&entry.entry_id).await;
        match self.setup_entry(entry.clone()).await {
            Err(SetupError::NotReady(reason)) => {
                self.spawn_setup_retry(entry);
                Err(SetupError::NotReady(reason))
            }
            result => result,
        }
    }

    pub async fn loaded_entries(&self) -> Vec<ConfigEntry> {
        self.entries
            .read()
            .await
            .values()
            .map(|loaded| loaded.entry.clone())
            .collect()
    }

    pub async fn states(&self) -> Vec<EntityState> {
        self.entries
            .read()
            .await
            .values()
            .flat_map(|loaded| loaded.states())
            .collect()
    }

    async fn binary_sensor_for(
        &self,
        address: &str,
        service: &'static str,
    ) -> Result<Arc<GenericBtBinarySensor<C>>, ServiceError> {
        let entries = self.entries.read().await;
        let loaded = entries
            .values()
            .find(|loaded| loaded.coordinator.address().eq_ignore_ascii_case(address))
            .ok_or_else(|| ServiceError::UnknownDevice(address.to_string()))?;
        loaded
            .binary_sensor
            .clone()
            .ok_or_else(|| ServiceError::NotRegistered {
                service,
                address: address.to_string(),
            })
    }

    /// `write_gatt` service
    pub async fn write_gatt(
        &self,
        address: &str,
        target_uuid: &str,
        data: &str,
    ) -> Result<(), ServiceError> {
        let sensor = self.binary_sensor_for(address, SERVICE_WRITE_GATT).await?;
        let state = sensor.write_gatt(target_uuid, data).await?;
        let _ = self.states.send(state);
        Ok(())
    }

    /// `read_gatt` service
    pub async fn read_gatt(&self, address: &str, target_uuid: &str) -> Result<Vec<u8>, ServiceError> {
        let sensor = self.binary_sensor_for(address, SERVICE_READ_GATT).await?;
        let (value, state) = sensor.read_gatt(target_uuid).await?;
        let _ = self.states.send(state);
        Ok(value)
    }

    pub async fn shutdown(&self) {
        for (_, handle) in self.lock_retries().drain() {
            handle.abort();
        }
        let entry_ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        for entry_id in entry_ids {
            self.unload_entry(&entry_id).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::manufacturer::{SKIP_HEADER_ID, TAGGED_ID};
    use crate::infrastructure::bluetooth::testing::FakeConnector;
    use std::collections::BTreeMap;

    pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
    pub const CHAR_UUID: &str = "0000fff1-0000-1000-8000-00805f9b34fb";

    pub fn advertisement(manufacturer_id: u16, payload: Vec<u8>) -> ServiceInfo {
        ServiceInfo {
            address: ADDRESS.into(),
            name: Some("Thermo".into()),
            rssi: Some(-50),
            manufacturer_data: BTreeMap::from([(manufacturer_id, payload)]),
        }
    }

    pub struct Harness {
        pub service: Arc<BluetoothService<FakeConnector>>,
        pub registry: Arc<DiscoveryRegistry<FakeConnector>>,
        pub advertisements: broadcast::Sender<ServiceInfo>,
        pub connector: FakeConnector,
    }

    pub fn harness() -> Harness {
        let registry = Arc::new(DiscoveryRegistry::new());
        let (advertisements, _) = broadcast::channel(16);
        let options = SetupOptions {
            connect_timeout: Duration::from_secs(1),
            ready_timeout: Duration::from_millis(200),
            retry_interval: Duration::from_millis(20),
        };
        let service = Arc::new(BluetoothService::new(
            registry.clone(),
            advertisements.clone(),
            options,
        ));
        Harness {
            service,
            registry,
            advertisements,
            connector: FakeConnector::new(ADDRESS),
        }
    }

    impl Harness {
        /// Broadcast `info` every few milliseconds until aborted.
        pub fn advertise(&self, info: ServiceInfo) -> JoinHandle<()> {
            let sender = self.advertisements.clone();
            tokio::spawn(async move {
                loop {
                    let _ = sender.send(info.clone());
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        }

        /// Record a discovery and keep advertising it until setup finishes.
        pub async fn setup(&self, info: ServiceInfo) -> Result<ConfigEntry, SetupError> {
            self.registry.record(self.connector.clone(), info.clone());
            let entry = ConfigEntry::new("Thermo", ADDRESS.to_lowercase());
            let advertiser = self.advertise(info);
            let result = self.service.setup_entry(entry.clone()).await;
            advertiser.abort();
            result.map(|()| entry)
        }
    }

    #[tokio::test]
    async fn missing_device_is_not_ready() {
        let h = harness();
        let err = h
            .service
            .setup_entry(ConfigEntry::new("Thermo", ADDRESS))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Could not find Generic BT Device with address {ADDRESS}")
        );
    }

    #[tokio::test]
    async fn silent_device_is_not_ready() {
        let h = harness();
        h.registry.record(h.connector.clone(), advertisement(89, vec![1]));
        let err = h
            .service
            .setup_entry(ConfigEntry::new("Thermo", ADDRESS))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("{ADDRESS} is not advertising state"));
        assert!(h.service.loaded_entries().await.is_empty());
    }

    #[tokio::test]
    async fn generic_device_gets_both_entities_and_services() {
        let h = harness();
        let entry = h.setup(advertisement(89, vec![0xca, 0xfe])).await.unwrap();

        let states = h.service.states().await;
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].state, "off");
        assert_eq!(states[1].state["89"], "cafe");

        let mut published = h.service.subscribe_states();
        h.service
            .write_gatt(&ADDRESS.to_lowercase(), CHAR_UUID, "0102")
            .await
            .unwrap();
        let mut saw_on = false;
        while let Ok(state) = published.try_recv() {
            saw_on |= state.entity_id.starts_with("binary_sensor.") && state.state == "on";
        }
        assert!(saw_on);
        assert_eq!(h.service.states().await[0].state, "on");
        assert_eq!(
            h.service.read_gatt(ADDRESS, CHAR_UUID).await.unwrap(),
            vec![0x01, 0x02]
        );

        assert!(h.service.unload_entry(&entry.entry_id).await);
        assert_eq!(h.connector.disconnect_count(), 1);
        assert!(matches!(
            h.service.read_gatt(ADDRESS, CHAR_UUID).await,
            Err(ServiceError::UnknownDevice(_))
        ));
    }

    #[tokio::test]
    async fn vendor_devices_get_no_services() {
        for manufacturer_id in [SKIP_HEADER_ID, TAGGED_ID] {
            let h = harness();
            h.setup(advertisement(manufacturer_id, vec![0u8; 19]))
                .await
                .unwrap();

            let states = h.service.states().await;
            assert_eq!(states.len(), 1);
            assert!(states[0].entity_id.starts_with("sensor."));
            assert!(matches!(
                h.service.write_gatt(ADDRESS, CHAR_UUID, "00").await,
                Err(ServiceError::NotRegistered { service: "write_gatt", .. })
            ));
            assert_eq!(h.connector.connect_count(), 0);
        }
    }

    #[tokio::test]
    async fn reload_replaces_loaded_entry() {
        let h = harness();
        let entry = h.setup(advertisement(89, vec![1])).await.unwrap();
        assert!(matches!(
            h.service.setup_entry(entry.clone()).await,
            Err(SetupError::AlreadyLoaded(_))
        ));

        h.registry.record(h.connector.clone(), advertisement(89, vec![2]));
        let advertiser = h.advertise(advertisement(89, vec![2]));
        h.service.reload_entry(entry).await.unwrap();
        advertiser.abort();

        assert_eq!(h.service.loaded_entries().await.len(), 1);
        h.service.shutdown().await;
        assert!(h.service.loaded_entries().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_setups_load_one_coordinator() {
        let h = harness();
        let info = advertisement(89, vec![1]);
        h.registry.record(h.connector.clone(), info.clone());
        let advertiser = h.advertise(info);

        let entry = ConfigEntry::new("Thermo", ADDRESS);
        let (first, second) = tokio::join!(
            h.service.setup_entry(entry.clone()),
            h.service.setup_entry(entry.clone())
        );
        advertiser.abort();

        let loaded = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(loaded, 1, "first={first:?} second={second:?}");
        assert!(matches!(
            [first, second].into_iter().find(|r| r.is_err()),
            Some(Err(SetupError::AlreadyLoaded(_)))
        ));
        assert_eq!(h.service.loaded_entries().await.len(), 1);

        assert!(h.service.unload_entry(&entry.entry_id).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.advertisements.receiver_count(), 0);
    }

    #[tokio::test]
    async fn not_ready_reload_keeps_retrying() {
        let h = harness();
        let entry = h.setup(advertisement(89, vec![1])).await.unwrap();

        assert!(matches!(
            h.service.reload_entry(entry.clone()).await,
            Err(SetupError::NotReady(_))
        ));
        assert!(h.service.loaded_entries().await.is_empty());

        let advertiser = h.advertise(advertisement(89, vec![2]));
        let reloaded = tokio::time::timeout(Duration::from_secs(2), async {
            while h.service.loaded_entries().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        advertiser.abort();
        assert!(reloaded.is_ok());
        assert_eq!(h.service.loaded_entries().await[0].entry_id, entry.entry_id);
    }

    #[tokio::test]
    async fn unload_cancels_pending_retry() {
        let h = harness();
        let entry = ConfigEntry::new("Thermo", ADDRESS);
        h.service.spawn_setup_retry(entry.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!h.service.unload_entry(&entry.entry_id).await);

        let info = advertisement(89, vec![1]);
        h.registry.record(h.connector.clone(), info.clone());
        let advertiser = h.advertise(info);
        tokio::time::sleep(Duration::from_millis(300)).await;
        advertiser.abort();
        assert!(h.service.loaded_entries().await.is_empty());
    }

    #[tokio::test]
    async fn retry_loads_entry_once_device_appears() {
        let h = harness();
        let entry = ConfigEntry::new("Thermo", ADDRESS);
        h.service.spawn_setup_retry(entry);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.service.loaded_entries().await.is_empty());

        let info = advertisement(89, vec![1]);
        h.registry.record(h.connector.clone(), info.clone());
        let advertiser = h.advertise(info);
        tokio::time::sleep(Duration::from_millis(400)).await;
        advertiser.abort();
        assert_eq!(h.service.loaded_entries().await.len(), 1);
    }
}
