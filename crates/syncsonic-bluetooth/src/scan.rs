//! Phone-facing device discovery.
//!
//! The phone starts a scan, receives one notification per discovered
//! speaker, and stops the scan. One scan runs at a time; the discovery
//! session ends when the handle is stopped or dropped.

use bluer::{Adapter, AdapterEvent, Session};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use syncsonic_core::Mac;

use crate::error::{BluetoothError, Result};

/// One speaker found during a phone-initiated scan.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredSpeaker {
    pub mac: Mac,
    pub name: String,
    pub paired: bool,
    pub rssi: Option<i16>,
}

/// Running scan session. Stopping (or dropping) the handle ends discovery.
pub struct ScanHandle {
    task: JoinHandle<()>,
}

impl ScanHandle {
    pub fn stop(self) {
        self.task.abort();
        info!("Scan stopped");
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts discovery sessions on a fixed adapter.
pub struct Scanner {
    session: Session,
    adapter_name: String,
}

impl Scanner {
    pub fn new(session: Session, adapter_name: impl Into<String>) -> Self {
        Self {
            session,
            adapter_name: adapter_name.into(),
        }
    }

    /// Start discovery, streaming each found speaker to `found`.
    pub async fn start(&self, found: mpsc::Sender<DiscoveredSpeaker>) -> Result<ScanHandle> {
        let adapter = self
            .session
            .adapter(&self.adapter_name)
            .map_err(|_| BluetoothError::AdapterLost(self.adapter_name.clone()))?;

        if !adapter.is_powered().await.unwrap_or(false) {
            return Err(BluetoothError::BlueZ(format!(
                "adapter {} is powered off",
                self.adapter_name
            )));
        }

        let events = adapter
            .discover_devices()
            .await
            .map_err(|e| BluetoothError::BlueZ(format!("failed to start discovery: {e}")))?;

        info!("Scan started on {}", self.adapter_name);
        let task = tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(addr) = event {
                    match describe_device(&adapter, addr).await {
                        Ok(Some(speaker)) => {
                            debug!("Scan hit: {} ({})", speaker.name, speaker.mac);
                            if found.send(speaker).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Failed to read device {}: {}", addr, e),
                    }
                }
            }
        });

        Ok(ScanHandle { task })
    }
}

/// Read the properties the phone cares about. Returns `None` for entries
/// that are not worth surfacing (nameless devices, junk MAC-like names).
async fn describe_device(
    adapter: &Adapter,
    addr: bluer::Address,
) -> Result<Option<DiscoveredSpeaker>> {
    let device = adapter
        .device(addr)
        .map_err(|e| BluetoothError::BlueZ(format!("failed to get device {addr}: {e}")))?;

    let name = match device.alias().await.ok().filter(|a| !a.is_empty()) {
        Some(alias) => alias,
        None => match device.name().await.ok().flatten() {
            Some(name) => name,
            None => return Ok(None),
        },
    };
    if name_looks_like_address(&name) {
        debug!("Filtering out device with address-shaped name: {}", name);
        return Ok(None);
    }

    let paired = device.is_paired().await.unwrap_or(false);
    let rssi = device.rssi().await.ok().flatten();

    Ok(Some(DiscoveredSpeaker {
        mac: Mac(addr.0),
        name,
        paired,
        rssi,
    }))
}

/// BlueZ reports nameless devices with their address as the alias
/// (`AA-BB-CC-DD-EE-FF`); those are noise on the phone's scan list.
fn name_looks_like_address(name: &str) -> bool {
    let runs = name
        .split('-')
        .filter(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
        .count();
    runs >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_shaped_names_are_filtered() {
        assert!(name_looks_like_address("AA-BB-CC-DD-EE-FF"));
        assert!(name_looks_like_address("12-34-56"));
        assert!(!name_looks_like_address("Kitchen Speaker"));
        assert!(!name_looks_like_address("JBL-Flip"));
        assert!(!name_looks_like_address(""));
    }

    #[tokio::test]
    #[ignore = "requires real Bluetooth hardware"]
    async fn scan_streams_devices() {
        let session = Session::new().await.unwrap();
        let scanner = Scanner::new(session, "hci0");
        let (tx, mut rx) = mpsc::channel(16);
        if let Ok(handle) = scanner.start(tx).await {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            handle.stop();
            while rx.try_recv().is_ok() {}
        }
    }
}
