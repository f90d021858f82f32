//! Bluetooth controller inventory and adapter-to-speaker assignment.
//!
//! Exactly one controller is reserved for BLE advertising; every other
//! controller may hold at most one A2DP speaker connection. The inventory
//! owns adapter records and the assignment map; the connection service
//! serializes assignment changes through it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use bluer::Session;
use tracing::{debug, info, warn};

use syncsonic_core::Mac;

use crate::error::{BluetoothError, Result};

/// Physical bus a controller hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    Uart,
    Usb,
    Unknown,
}

/// Role a controller plays in the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterRole {
    /// Advertises the GATT service; never used for A2DP.
    Reserved,
    /// Eligible to hold one speaker connection.
    Assignable,
}

/// One local Bluetooth controller.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Stable index parsed from the controller name (`hci3` -> 3).
    pub index: u16,
    /// Controller name, e.g. `hci0`.
    pub name: String,
    pub address: bluer::Address,
    pub bus: BusType,
    pub powered: bool,
    pub role: AdapterRole,
    /// Speaker currently owning this controller, if any.
    pub assigned: Option<Mac>,
    /// Set while a connection FSM is driving this controller.
    pub busy: bool,
}

/// Event emitted when the bus topology changes under us.
#[derive(Debug, Clone, PartialEq)]
pub enum InventoryEvent {
    /// An assignable adapter disappeared; any FSM holding it must abort.
    AdapterLost {
        name: String,
        assigned: Option<Mac>,
    },
    /// The advertising adapter disappeared. Fatal.
    ReservedLost,
    /// A new controller showed up and is now assignable.
    AdapterAdded(String),
}

/// Inventory of local controllers.
pub struct AdapterInventory {
    session: Option<Session>,
    reserved: String,
    adapters: BTreeMap<String, AdapterInfo>,
}

impl AdapterInventory {
    /// Enumerate controllers and pick the reserved adapter.
    ///
    /// `preference` names the controller to reserve; when it is absent the
    /// first UART-bus adapter (lowest index) is reserved instead. With no
    /// preference and no UART adapter the daemon cannot start.
    pub async fn new(session: Session, preference: Option<&str>) -> Result<Self> {
        let names = session.adapter_names().await?;
        if names.is_empty() {
            return Err(BluetoothError::AdapterNotFound);
        }

        let mut adapters = BTreeMap::new();
        for name in names {
            match probe_adapter(&session, &name).await {
                Ok(info) => {
                    adapters.insert(name, info);
                }
                Err(e) => warn!("Skipping adapter {}: {}", name, e),
            }
        }

        let reserved = pick_reserved(&adapters, preference)?;
        if let Some(info) = adapters.get_mut(&reserved) {
            info.role = AdapterRole::Reserved;
        }
        info!(
            "Adapter inventory: {} controller(s), reserved {}",
            adapters.len(),
            reserved
        );

        Ok(Self {
            session: Some(session),
            reserved,
            adapters,
        })
    }

    /// Build an inventory from a fixed adapter list, without a BlueZ
    /// session. Run-time adapter probing is disabled.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fixed(reserved: &str, adapters: Vec<AdapterInfo>) -> Self {
        Self {
            session: None,
            reserved: reserved.to_string(),
            adapters: adapters.into_iter().map(|a| (a.name.clone(), a)).collect(),
        }
    }

    /// Name of the reserved (advertising) controller.
    pub fn reserved_name(&self) -> &str {
        &self.reserved
    }

    /// Record for the reserved controller.
    pub fn reserved_adapter(&self) -> Option<&AdapterInfo> {
        self.adapters.get(&self.reserved)
    }

    /// All known controllers, sorted by name.
    pub fn list(&self) -> Vec<AdapterInfo> {
        self.adapters.values().cloned().collect()
    }

    /// Any assignable adapter that is powered, unassigned, and idle.
    /// Tie-break: lowest stable index.
    pub fn free_adapter(&self) -> Option<&AdapterInfo> {
        pick_free(&self.adapters)
    }

    /// Claim an adapter for a speaker. The adapter becomes busy until the
    /// connect sequence reaches a terminal state.
    pub fn assign(&mut self, name: &str, mac: Mac) -> Result<()> {
        let info = self
            .adapters
            .get_mut(name)
            .ok_or_else(|| BluetoothError::AdapterLost(name.to_string()))?;
        if info.role == AdapterRole::Reserved {
            return Err(BluetoothError::BlueZ(format!(
                "refusing to assign speaker to reserved adapter {name}"
            )));
        }
        if let Some(owner) = info.assigned {
            if owner != mac {
                return Err(BluetoothError::BlueZ(format!(
                    "adapter {name} already assigned to {owner}"
                )));
            }
        }
        info.assigned = Some(mac);
        info.busy = true;
        debug!("Assigned {} to {}", name, mac);
        Ok(())
    }

    /// Mark the connect sequence on an adapter finished; the assignment
    /// itself stays while the speaker remains connected.
    pub fn settle(&mut self, name: &str) {
        if let Some(info) = self.adapters.get_mut(name) {
            info.busy = false;
        }
    }

    /// Release an adapter held by a speaker.
    pub fn release(&mut self, name: &str, mac: Mac) {
        if let Some(info) = self.adapters.get_mut(name) {
            if info.assigned == Some(mac) {
                info.assigned = None;
                info.busy = false;
                debug!("Released {} from {}", name, mac);
            }
        }
    }

    /// Which adapter currently holds the given speaker.
    pub fn adapter_for(&self, mac: Mac) -> Option<&AdapterInfo> {
        self.adapters.values().find(|a| a.assigned == Some(mac))
    }

    /// Handle to the underlying bluer adapter.
    pub fn adapter(&self, name: &str) -> Result<bluer::Adapter> {
        self.session
            .as_ref()
            .ok_or(BluetoothError::AdapterNotFound)?
            .adapter(name)
            .map_err(|_| BluetoothError::AdapterLost(name.to_string()))
    }

    /// Fold a bus-level session event into the inventory.
    pub async fn handle_session_event(
        &mut self,
        event: bluer::SessionEvent,
    ) -> Option<InventoryEvent> {
        match event {
            bluer::SessionEvent::AdapterRemoved(name) => {
                if name == self.reserved {
                    warn!("Reserved adapter {} removed", name);
                    self.adapters.remove(&name);
                    return Some(InventoryEvent::ReservedLost);
                }
                let assigned = self.adapters.remove(&name).and_then(|a| a.assigned);
                warn!("Adapter {} removed (assigned: {:?})", name, assigned);
                Some(InventoryEvent::AdapterLost { name, assigned })
            }
            bluer::SessionEvent::AdapterAdded(name) => {
                let Some(session) = self.session.as_ref() else {
                    return None;
                };
                match probe_adapter(session, &name).await {
                    Ok(info) => {
                        info!("Adapter {} appeared ({:?} bus)", name, info.bus);
                        self.adapters.insert(name.clone(), info);
                        Some(InventoryEvent::AdapterAdded(name))
                    }
                    Err(e) => {
                        warn!("Ignoring new adapter {}: {}", name, e);
                        None
                    }
                }
            }
        }
    }

    /// Reflect a power property change reported by the bus.
    pub fn set_powered(&mut self, name: &str, powered: bool) {
        if let Some(info) = self.adapters.get_mut(name) {
            info.powered = powered;
        }
    }

}

/// Pick the reserved controller: the preferred name when it exists,
/// otherwise the lowest-index UART adapter.
fn pick_reserved(
    adapters: &BTreeMap<String, AdapterInfo>,
    preference: Option<&str>,
) -> Result<String> {
    match preference {
        Some(name) => {
            if !adapters.contains_key(name) {
                return Err(BluetoothError::ReservedAdapterMissing(name.to_string()));
            }
            Ok(name.to_string())
        }
        None => adapters
            .values()
            .filter(|a| a.bus == BusType::Uart)
            .min_by_key(|a| a.index)
            .map(|a| a.name.clone())
            .ok_or_else(|| {
                BluetoothError::ReservedAdapterMissing("no UART adapter".to_string())
            }),
    }
}

/// Selection rule behind [`AdapterInventory::free_adapter`].
fn pick_free(adapters: &BTreeMap<String, AdapterInfo>) -> Option<&AdapterInfo> {
    adapters
        .values()
        .filter(|a| {
            a.role == AdapterRole::Assignable && a.powered && a.assigned.is_none() && !a.busy
        })
        .min_by_key(|a| a.index)
}

/// Build an [`AdapterInfo`] by querying BlueZ and sysfs.
async fn probe_adapter(session: &Session, name: &str) -> Result<AdapterInfo> {
    let adapter = session.adapter(name)?;
    let address = adapter.address().await?;
    let powered = adapter.is_powered().await.unwrap_or(false);

    Ok(AdapterInfo {
        index: adapter_index(name),
        name: name.to_string(),
        address,
        bus: bus_type_of(name),
        powered,
        role: AdapterRole::Assignable,
        assigned: None,
        busy: false,
    })
}

/// Stable index from the controller name (`hci3` -> 3).
fn adapter_index(name: &str) -> u16 {
    name.trim_start_matches("hci").parse().unwrap_or(u16::MAX)
}

/// Classify the bus from the sysfs device link for the controller.
fn bus_type_of(name: &str) -> BusType {
    match fs::read_link(Path::new("/sys/class/bluetooth").join(name)) {
        Ok(target) => {
            let target = target.to_string_lossy();
            if target.contains("usb") {
                BusType::Usb
            } else if target.contains("serial") || target.contains("uart") {
                BusType::Uart
            } else {
                BusType::Unknown
            }
        }
        Err(_) => BusType::Unknown,
    }
}
