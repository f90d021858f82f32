//! # syncsonic-core
//!
//! Core types shared across all SyncSonic daemon crates.
//!
//! This crate provides:
//! - Speaker MAC address representation
//! - Per-speaker audio settings and setting patches
//! - The opcode set and binary frame codec of the BLE control protocol
//! - Connection phase events and their wire projection
//! - The Pi-Status snapshot record
//! - Daemon configuration read from the environment

pub mod address;
pub mod config;
pub mod error;
pub mod frame;
pub mod phase;
pub mod settings;
pub mod snapshot;

pub use address::Mac;
pub use config::{AllowedScope, Config, VolumeCurve};
pub use error::{AddressError, ConfigError, FrameError};
pub use frame::{Frame, Opcode};
pub use phase::{Phase, PhaseEvent};
pub use settings::{SettingsPatch, SpeakerSettings};
pub use snapshot::PiStatus;
