//! Config flow
//!
//! Turns a discovered (or manually picked) BLE address into a
//! [`ConfigEntry`]. A device can only be configured once.

use crate::domain::models::{ConfigEntry, ServiceInfo};
use crate::infrastructure::bluetooth::registry::DiscoveryRegistry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const STEP_USER: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    AlreadyConfigured,
    NoDevicesFound,
}

impl AbortReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyConfigured => "already_configured",
            Self::NoDevicesFound => "no_devices_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    CreateEntry(ConfigEntry),
    ShowForm {
        step_id: &'static str,
        /// address -> "<name> (<address>)"
        choices: BTreeMap<String, String>,
        errors: BTreeMap<String, String>,
    },
    Abort(AbortReason),
}

/// `"<name> (<last four hex digits of the address>)"`
pub fn human_readable_name(name: Option<&str>, address: &str) -> String {
    let name = name.filter(|n| !n.is_empty()).unwrap_or(address);
    let digits: String = address
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_uppercase();
    let short = &digits[digits.len().saturating_sub(4)..];
    format!("{name} ({short})")
}

pub struct ConfigFlow<'a, H> {
    registry: &'a DiscoveryRegistry<H>,
    configured: BTreeSet<String>,
    discovery_info: Option<ServiceInfo>,
    discovered_devices: BTreeMap<String, ServiceInfo>,
    title_placeholder: Option<String>,
}

impl<'a, H: Clone> ConfigFlow<'a, H> {
    pub fn new(
        registry: &'a DiscoveryRegistry<H>,
        configured: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            registry,
            configured: configured.into_iter().map(|a| a.to_uppercase()).collect(),
            discovery_info: None,
            discovered_devices: BTreeMap::new(),
            title_placeholder: None,
        }
    }

    pub fn title_placeholder(&self) -> Option<&str> {
        self.title_placeholder.as_deref()
    }

    fn is_configured(&self, address: &str) -> bool {
        self.configured.contains(&address.to_uppercase())
    }

    /// A device was discovered passively.
    pub fn step_bluetooth(&mut self, discovery_info: ServiceInfo) -> FlowResult {
        if self.is_configured(&discovery_info.address) {
            return FlowResult::Abort(AbortReason::AlreadyConfigured);
        }
        self.title_placeholder = Some(human_readable_name(
            discovery_info.name.as_deref(),
            &discovery_info.address,
        ));
        self.discovery_info = Some(discovery_info);
        self.step_user(None)
    }

    /// Pick a device. Without input, shows the list of candidates.
    pub fn step_user(&mut self, user_input: Option<&str>) -> FlowResult {
        let mut errors = BTreeMap::new();

        if let Some(address) = user_input {
            match self.lookup(address) {
                Some(info) => return self.create_entry(info),
                None => {
                    errors.insert("base".to_string(), "unknown".to_string());
                }
            }
        }

        if let Some(discovery) = &self.discovery_info {
            self.discovered_devices
                .insert(discovery.address.to_uppercase(), discovery.clone());
        } else {
            for discovery in self.registry.discovered_service_info() {
                let key = discovery.address.to_uppercase();
                if self.configured.contains(&key) || self.discovered_devices.contains_key(&key) {
                    continue;
                }
                self.discovered_devices.insert(key, discovery);
            }
        }

        if self.discovered_devices.is_empty() {
            return FlowResult::Abort(AbortReason::NoDevicesFound);
        }

        let choices = self
            .discovered_devices
            .values()
            .map(|info| {
                (
                    info.address.clone(),
                    format!("{} ({})", info.display_name(), info.address),
                )
            })
            .collect();

        FlowResult::ShowForm {
            step_id: STEP_USER,
            choices,
            errors,
        }
    }

    /// Only devices offered by an earlier form can be picked.
    fn lookup(&self, address: &str) -> Option<ServiceInfo> {
        self.discovered_devices.get(&address.to_uppercase()).cloned()
    }

    fn create_entry(&self, info: ServiceInfo) -> FlowResult {
        if self.is_configured(&info.address) {
            return FlowResult::Abort(AbortReason::AlreadyConfigured);
        }

        debug!(address = %info.address, "Creating entry");
        FlowResult::CreateEntry(ConfigEntry::new(info.display_name(), info.address.clone()))
    }
}
