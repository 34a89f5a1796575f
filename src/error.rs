//! Error types shared across the crate.

use thiserror::Error;
use uuid::Uuid;

/// Failures of the single-connection GATT path
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("timeout on connect")]
    ConnectTimeout,
    #[error("error on connect: {0}")]
    ConnectFailed(#[source] btleplug::Error),
    #[error("invalid characteristic uuid {value:?}: {source}")]
    InvalidUuid {
        value: String,
        #[source]
        source: uuid::Error,
    },
    #[error("invalid hex payload: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("characteristic {uuid} not found")]
    CharacteristicNotFound { uuid: Uuid },
    #[error("GATT operation failed: {0}")]
    Gatt(#[from] btleplug::Error),
}

/// Reasons a config entry could not be set up
#[derive(Debug, Error)]
pub enum SetupError {
    /// Device is not reachable yet; setup may be retried later
    #[error("{0}")]
    NotReady(String),
    #[error("entry {0} is already set up")]
    AlreadyLoaded(String),
}

/// Failures of the `write_gatt` / `read_gatt` services
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no device with address {0} is set up")]
    UnknownDevice(String),
    #[error("service {service} is not registered for {address}")]
    NotRegistered {
        service: &'static str,
        address: String,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
}
