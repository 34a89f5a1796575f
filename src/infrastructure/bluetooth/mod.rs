//! Bluetooth Module
//!
//! Talks to generic BLE devices: passive advertisement handling and a
//! single-connection GATT path per device.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                     │
//! │     (entry setup/unload, entities, GATT services)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌────────────┐ ┌──────────────┐ ┌────────────┐
//! │  Scanner   │ │ Coordinator  │ │   Device   │
//! │            │ │              │ │            │
//! │ - btleplug │ │ - adverts →  │ │ - lazy     │
//! │   events   │ │   device     │ │   connect  │
//! │ - registry │ │ - readiness  │ │ - GATT r/w │
//! └────────────┘ └──────────────┘ └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`connection`] - Connector/link traits and the `btleplug` implementation
//! - [`device`] - Device wrapper with the guarded connection
//! - [`coordinator`] - Passive advertisement coordinator
//! - [`registry`] - Discovery registry
//! - [`scanner`] - BLE device discovery
//! - [`protocol`] - UUID and hex payload parsing
//! - [`service`] - Entry setup and service routing

pub mod connection;
pub mod coordinator;
pub mod device;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use service::BluetoothService;
