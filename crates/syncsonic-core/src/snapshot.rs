//! The Pi-Status snapshot published to the phone.

use std::collections::BTreeSet;

use serde_json::json;

use crate::address::Mac;
use crate::frame::Frame;

/// Derived record of which speakers are connected-and-routed, plus the
/// scanning flag. Recomputed after every terminal FSM transition and
/// adapter event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PiStatus {
    pub connected: BTreeSet<Mac>,
    pub scanning: bool,
}

impl PiStatus {
    pub fn new(connected: impl IntoIterator<Item = Mac>, scanning: bool) -> Self {
        Self {
            connected: connected.into_iter().collect(),
            scanning,
        }
    }

    /// Render as a success frame. Sorted MAC order keeps notifications
    /// deterministic for the phone and for tests.
    pub fn to_frame(&self) -> Frame {
        Frame::success(json!({
            "connected": self.connected.iter().collect::<Vec<_>>(),
            "scanning": self.scanning,
        }))
    }
}
