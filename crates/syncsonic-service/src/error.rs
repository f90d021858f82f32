//! Error types for the connection service.

use thiserror::Error;

use syncsonic_core::Mac;

/// Connection-service error types.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A connection attempt for this speaker is already in flight.
    #[error("a connection attempt for {0} is already running")]
    Busy(Mac),

    /// The target is outside the active whitelist.
    #[error("{0} is not in the allowed list")]
    NotAllowed(Mac),

    /// The speaker has no loopback to operate on.
    #[error(transparent)]
    Audio(#[from] syncsonic_audio::AudioError),

    /// A BlueZ operation failed.
    #[error(transparent)]
    Bluetooth(#[from] syncsonic_bluetooth::BluetoothError),
}

/// Convenience Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
