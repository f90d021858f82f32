//! Events published by the service layer.
//!
//! Every component pushes typed events onto one queue; the daemon's pump
//! renders them into notification frames for the phone. Nothing is thrown
//! across suspension points.

use syncsonic_bluetooth::DiscoveredSpeaker;
use syncsonic_core::{PhaseEvent, PiStatus};

/// One event on the daemon's internal queue.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// Connection phase progress or failure for one speaker.
    Phase(PhaseEvent),
    /// The connected set or scanning flag changed.
    Snapshot(PiStatus),
    /// A speaker turned up during a phone-initiated scan.
    ScanDevice(DiscoveredSpeaker),
    /// Unrecoverable failure; the supervisor logs and exits nonzero.
    Fatal(String),
}
