//! Connection phase events.
//!
//! Each per-speaker state machine emits a stream of phase events while it
//! drives discovery, pairing, trust, connect, and audio routing. The JSON
//! wire form sent to the phone is a pure projection of these values.

use serde_json::{json, Value};

use crate::address::Mac;
use crate::frame::{Frame, Opcode};

/// Enumerated progress markers surfaced to the phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    FsmStart,
    DiscoveryStart,
    DiscoveryComplete,
    DiscoveryTimeout,
    PairingStart,
    PairingSuccess,
    PairingFailed,
    Trusting,
    TrustFailed,
    ConnectStart,
    ConnectSuccess,
    ConnectFailed,
    LoopbackFailed,
    AdapterLost,
    NoAdapter,
    DisconnectDone,
}

impl Phase {
    /// Wire name of this phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::FsmStart => "fsm_start",
            Phase::DiscoveryStart => "discovery_start",
            Phase::DiscoveryComplete => "discovery_complete",
            Phase::DiscoveryTimeout => "discovery_timeout",
            Phase::PairingStart => "pairing_start",
            Phase::PairingSuccess => "pairing_success",
            Phase::PairingFailed => "pairing_failed",
            Phase::Trusting => "trusting",
            Phase::TrustFailed => "trust_failed",
            Phase::ConnectStart => "connect_start",
            Phase::ConnectSuccess => "connect_success",
            Phase::ConnectFailed => "connect_failed",
            Phase::LoopbackFailed => "loopback_failed",
            Phase::AdapterLost => "adapter_lost",
            Phase::NoAdapter => "no_adapter",
            Phase::DisconnectDone => "disconnect_done",
        }
    }

    /// Whether this phase reports a failure.
    ///
    /// Failures travel as structured error frames; progress phases travel
    /// as connection status updates.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Phase::DiscoveryTimeout
                | Phase::PairingFailed
                | Phase::TrustFailed
                | Phase::ConnectFailed
                | Phase::LoopbackFailed
                | Phase::AdapterLost
                | Phase::NoAdapter
        )
    }
}

/// One phase event for one target speaker.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseEvent {
    pub phase: Phase,
    pub device: Mac,
    /// Attempt counter for retried phases.
    pub attempt: Option<u32>,
    /// Free-form state detail, when a phase carries one.
    pub state: Option<String>,
}

impl PhaseEvent {
    pub fn new(phase: Phase, device: Mac) -> Self {
        Self {
            phase,
            device,
            attempt: None,
            state: None,
        }
    }

    pub fn with_attempt(phase: Phase, device: Mac, attempt: u32) -> Self {
        Self {
            phase,
            device,
            attempt: Some(attempt),
            state: None,
        }
    }

    /// JSON projection shared by both frame kinds.
    fn payload(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("phase".into(), self.phase.as_str().into());
        map.insert("device".into(), json!(self.device));
        if let Some(attempt) = self.attempt {
            map.insert("attempt".into(), attempt.into());
        }
        if let Some(state) = &self.state {
            map.insert("state".into(), state.as_str().into());
        }
        Value::Object(map)
    }

    /// Render as the frame delivered to the phone: status updates for
    /// progress phases, structured errors for failures.
    pub fn to_frame(&self) -> Frame {
        let opcode = if self.phase.is_failure() {
            Opcode::Error
        } else {
            Opcode::ConnectionStatus
        };
        Frame::new(opcode, self.payload())
    }
}
