//! Error types for Bluetooth operations.

use thiserror::Error;

/// Bluetooth-specific error types.
#[derive(Error, Debug)]
pub enum BluetoothError {
    /// No Bluetooth controller visible to the host.
    #[error("no Bluetooth adapter found")]
    AdapterNotFound,

    /// The controller reserved for BLE advertising is missing.
    #[error("reserved adapter {0} not present")]
    ReservedAdapterMissing(String),

    /// Every assignable controller already holds a speaker.
    #[error("no free adapter available")]
    NoFreeAdapter,

    /// Adapter disappeared while an operation held it.
    #[error("adapter {0} lost")]
    AdapterLost(String),

    /// Target speaker never showed up during inquiry.
    #[error("discovery timed out for {0}")]
    DiscoveryTimeout(String),

    /// Pairing failed.
    #[error("pairing failed: {0}")]
    PairingFailed(String),

    /// Marking the device trusted failed.
    #[error("trust failed: {0}")]
    TrustFailed(String),

    /// Profile connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// BlueZ D-Bus error.
    #[error("BlueZ error: {0}")]
    BlueZ(String),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Operation cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bluer::Error> for BluetoothError {
    fn from(e: bluer::Error) -> Self {
        BluetoothError::BlueZ(e.to_string())
    }
}

/// Convenience Result type for Bluetooth operations.
pub type Result<T> = std::result::Result<T, BluetoothError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let err = BluetoothError::ReservedAdapterMissing("hci1".to_string());
        assert!(err.to_string().contains("hci1"));

        let err = BluetoothError::DiscoveryTimeout("AA:BB:CC:DD:EE:01".to_string());
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:01"));

        let err = BluetoothError::NoFreeAdapter;
        assert!(err.to_string().contains("no free adapter"));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: BluetoothError = io_err.into();
        assert!(matches!(err, BluetoothError::Io(_)));
    }
}
