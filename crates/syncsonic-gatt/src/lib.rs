//! # syncsonic-gatt
//!
//! The BLE control surface of the daemon: one primary service with one
//! characteristic (read, write-without-response, notify) on the reserved
//! adapter. Inbound writes are opcode-prefixed JSON frames dispatched to
//! the connection service, audio router, and sync engine; phase events
//! and snapshots flow back to the phone as notifications through a
//! merging outbound queue.

#![cfg(target_os = "linux")]

pub mod dispatch;
pub mod notifier;
pub mod server;

pub use dispatch::{event_to_frame, Dispatcher};
pub use notifier::{coalesce, Notifier};
pub use server::{GattServer, ADVERTISED_NAME, CHARACTERISTIC_UUID, SERVICE_UUID};
