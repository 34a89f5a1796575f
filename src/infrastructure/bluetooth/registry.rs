//! Discovery registry
//!
//! Remembers the handle and the last advertisement of every device the
//! scanner has seen. Addresses are matched case-insensitively.

use crate::domain::models::ServiceInfo;
use std::collections::BTreeMap;
use std::sync::RwLock;

struct Discovered<H> {
    handle: H,
    info: ServiceInfo,
}

pub struct DiscoveryRegistry<H> {
    entries: RwLock<BTreeMap<String, Discovered<H>>>,
}

impl<H> Default for DiscoveryRegistry<H> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<H: Clone> DiscoveryRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest advertisement for a device, replacing the previous one.
    pub fn record(&self, handle: H, info: ServiceInfo) {
        let key = info.address.to_uppercase();
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key, Discovered { handle, info });
    }

    pub fn ble_device_from_address(&self, address: &str) -> Option<H> {
        self.with_entries(|entries| {
            entries
                .get(&address.to_uppercase())
                .map(|d| d.handle.clone())
        })
    }

    pub fn last_service_info(&self, address: &str) -> Option<ServiceInfo> {
        self.with_entries(|entries| {
            entries
                .get(&address.to_uppercase())
                .map(|d| d.info.clone())
        })
    }

    pub fn discovered_service_info(&self) -> Vec<ServiceInfo> {
        self.with_entries(|entries| entries.values().map(|d| d.info.clone()).collect())
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    fn with_entries<R>(&self, f: impl FnOnce(&BTreeMap<String, Discovered<H>>) -> R) -> R {
        match self.entries.read() {
            Ok(entries) => f(&entries),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(address: &str, rssi: i16) -> ServiceInfo {
        ServiceInfo {
            address: address.into(),
            rssi: Some(rssi),
            ..Default::default()
        }
    }

    #[test]
    fn lookups_ignore_case() {
        let registry = DiscoveryRegistry::new();
        registry.record("handle-1", info("aa:bb:cc:dd:ee:ff", -60));

        assert_eq!(
            registry.ble_device_from_address("AA:BB:CC:DD:EE:FF"),
            Some("handle-1")
        );
        assert_eq!(
            registry
                .last_service_info("Aa:Bb:Cc:Dd:Ee:Ff")
                .and_then(|i| i.rssi),
            Some(-60)
        );
        assert!(registry.ble_device_from_address("11:22:33:44:55:66").is_none());
    }

    #[test]
    fn latest_advertisement_wins() {
        let registry = DiscoveryRegistry::new();
        registry.record("old", info("AA:BB:CC:DD:EE:FF", -80));
        registry.record("new", info("AA:BB:CC:DD:EE:FF", -40));
        registry.record("other", info("11:22:33:44:55:66", -70));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.ble_device_from_address("AA:BB:CC:DD:EE:FF"),
            Some("new")
        );
        let all = registry.discovered_service_info();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].rssi, Some(-40));
    }
}
