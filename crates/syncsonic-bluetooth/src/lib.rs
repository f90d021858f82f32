//! # syncsonic-bluetooth
//!
//! BlueZ-facing building blocks of the SyncSonic daemon:
//!
//! - Adapter inventory: enumerates local controllers, classifies the
//!   reserved (BLE-advertising) adapter versus assignable A2DP adapters,
//!   and tracks adapter-to-speaker assignment.
//! - Device registry: the source of truth for speakers the phone sees.
//! - Pairing agent: a no-interaction BlueZ agent that auto-confirms
//!   speaker pairing.
//! - Speaker link: the discovery/pair/trust/connect operations the
//!   connection state machine drives, behind a trait so the state machine
//!   can be tested without hardware.
//! - Scanner: phone-facing discovery streaming found speakers.
//!
//! This crate is Linux-only and requires the BlueZ daemon.

#![cfg(target_os = "linux")]

pub mod agent;
pub mod error;
pub mod inventory;
pub mod link;
pub mod registry;
pub mod scan;

pub use agent::register_pairing_agent;
pub use error::{BluetoothError, Result};
pub use inventory::{AdapterInfo, AdapterInventory, AdapterRole, BusType, InventoryEvent};
pub use link::{BluerLink, SpeakerLink, A2DP_SINK_UUID};
pub use registry::{DeviceRegistry, SpeakerRecord};
pub use scan::{DiscoveredSpeaker, ScanHandle, Scanner};
