//! Binary framing for the BLE control protocol.
//!
//! Every frame in either direction is one opcode byte followed by an
//! optional UTF-8 JSON payload. An absent payload decodes as `{}`.

use serde_json::Value;

use crate::error::FrameError;

/// Message opcodes shared with the phone app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Liveness probe from the phone.
    Ping = 0x01,
    /// Reply to a ping.
    Pong = 0x02,
    /// Structured error report (server to phone).
    Error = 0x03,
    /// Start discovery for nearby speakers.
    ScanStart = 0x40,
    /// Stop discovery.
    ScanStop = 0x41,
    /// One discovered speaker (server to phone).
    ScanDevice = 0x43,
    /// Connect a single target speaker.
    ConnectOne = 0x60,
    /// Disconnect a speaker.
    Disconnect = 0x61,
    /// Set per-speaker loopback latency.
    SetLatency = 0x62,
    /// Set per-speaker volume and balance.
    SetVolume = 0x63,
    /// List paired speakers.
    GetPairedDevices = 0x64,
    /// Mute or unmute a speaker.
    SetMute = 0x65,
    /// Open a classic-pairing window for the phone.
    StartClassicPairing = 0x66,
    /// Run one ultrasonic auto-sync cycle.
    UltrasonicSync = 0x67,
    /// Connection phase update (server to phone).
    ConnectionStatus = 0x70,
    /// Success acknowledgement or status snapshot.
    Success = 0xF0,
    /// Failure acknowledgement with a reason.
    Failure = 0xF1,
}

impl Opcode {
    /// Wire value of this opcode.
    pub fn byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        Ok(match value {
            0x01 => Opcode::Ping,
            0x02 => Opcode::Pong,
            0x03 => Opcode::Error,
            0x40 => Opcode::ScanStart,
            0x41 => Opcode::ScanStop,
            0x43 => Opcode::ScanDevice,
            0x60 => Opcode::ConnectOne,
            0x61 => Opcode::Disconnect,
            0x62 => Opcode::SetLatency,
            0x63 => Opcode::SetVolume,
            0x64 => Opcode::GetPairedDevices,
            0x65 => Opcode::SetMute,
            0x66 => Opcode::StartClassicPairing,
            0x67 => Opcode::UltrasonicSync,
            0x70 => Opcode::ConnectionStatus,
            0xF0 => Opcode::Success,
            0xF1 => Opcode::Failure,
            other => return Err(FrameError::UnknownOpcode(other)),
        })
    }
}

/// One decoded control frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Value,
}

impl Frame {
    /// Build a frame with a JSON payload.
    pub fn new(opcode: Opcode, payload: Value) -> Self {
        Self { opcode, payload }
    }

    /// Build a frame with an empty `{}` payload.
    pub fn empty(opcode: Opcode) -> Self {
        Self {
            opcode,
            payload: Value::Object(Default::default()),
        }
    }

    /// Success acknowledgement with the given payload.
    pub fn success(payload: Value) -> Self {
        Self::new(Opcode::Success, payload)
    }

    /// Failure acknowledgement carrying a reason string.
    pub fn failure(reason: &str) -> Self {
        Self::new(Opcode::Failure, serde_json::json!({ "reason": reason }))
    }

    /// Serialize to the wire form: opcode byte followed by JSON bytes.
    ///
    /// Empty-object payloads still serialize as `{}` so the phone can
    /// parse every frame the same way.
    pub fn encode(&self) -> Vec<u8> {
        let json = self.payload.to_string();
        let mut out = Vec::with_capacity(1 + json.len());
        out.push(self.opcode.byte());
        out.extend_from_slice(json.as_bytes());
        out
    }

    /// Decode a frame received over the characteristic.
    ///
    /// `mtu` is the negotiated ATT MTU; payloads longer than `mtu - 1`
    /// are rejected before any JSON parsing happens.
    pub fn decode(bytes: &[u8], mtu: usize) -> Result<Self, FrameError> {
        let (&opcode_byte, payload) = bytes.split_first().ok_or(FrameError::Empty)?;
        let opcode = Opcode::try_from(opcode_byte)?;

        if payload.len() > mtu.saturating_sub(1) {
            return Err(FrameError::Oversize);
        }

        if payload.is_empty() {
            return Ok(Frame::empty(opcode));
        }

        let payload: Value = serde_json::from_slice(payload)
            .map_err(|e| FrameError::MalformedJson(e.to_string()))?;
        Ok(Frame { opcode, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MTU: usize = 247;

    mod opcode {
        use super::*;

        #[test]
        fn round_trips_every_known_value() {
            for byte in [
                0x01u8, 0x02, 0x03, 0x40, 0x41, 0x43, 0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66,
                0x67, 0x70, 0xF0, 0xF1,
            ] {
                let opcode = Opcode::try_from(byte).unwrap();
                assert_eq!(opcode.byte(), byte);
            }
        }

        #[test]
        fn rejects_unknown_values() {
            assert_eq!(
                Opcode::try_from(0x42),
                Err(FrameError::UnknownOpcode(0x42))
            );
            assert_eq!(
                Opcode::try_from(0xFF),
                Err(FrameError::UnknownOpcode(0xFF))
            );
        }
    }

    mod codec {
        use super::*;

        #[test]
        fn encode_then_decode_round_trips() {
            let frame = Frame::new(
                Opcode::SetVolume,
                json!({"mac": "AA:BB:CC:DD:EE:01", "volume": 80, "balance": 0.25}),
            );
            let bytes = frame.encode();
            let back = Frame::decode(&bytes, MTU).unwrap();
            assert_eq!(back, frame);
        }

        #[test]
        fn missing_payload_decodes_as_empty_object() {
            let frame = Frame::decode(&[0x40], MTU).unwrap();
            assert_eq!(frame.opcode, Opcode::ScanStart);
            assert_eq!(frame.payload, json!({}));
        }

        #[test]
        fn empty_write_is_rejected() {
            assert_eq!(Frame::decode(&[], MTU), Err(FrameError::Empty));
        }

        #[test]
        fn unknown_opcode_is_rejected() {
            let err = Frame::decode(&[0x99, b'{', b'}'], MTU).unwrap_err();
            assert_eq!(err, FrameError::UnknownOpcode(0x99));
            assert_eq!(err.reason(), "unknown_opcode");
        }

        #[test]
        fn garbage_payload_is_rejected() {
            let err = Frame::decode(&[0x63, b'n', b'o', b'p', b'e'], MTU).unwrap_err();
            assert!(matches!(err, FrameError::MalformedJson(_)));
            assert_eq!(err.reason(), "malformed_json");
        }

        #[test]
        fn oversize_payload_is_rejected_before_parsing() {
            let mut bytes = vec![0x60];
            bytes.extend(std::iter::repeat(b'x').take(MTU));
            let err = Frame::decode(&bytes, MTU).unwrap_err();
            assert_eq!(err, FrameError::Oversize);
        }

        #[test]
        fn payload_at_mtu_boundary_is_accepted() {
            // Exactly mtu - 1 payload bytes must still parse.
            let inner = "x".repeat(MTU - 1 - 8);
            let frame = Frame::new(Opcode::Ping, json!({ "p": inner }));
            let bytes = frame.encode();
            assert_eq!(bytes.len(), MTU);
            assert!(Frame::decode(&bytes, MTU).is_ok());
        }

        #[test]
        fn failure_helper_carries_reason() {
            let frame = Frame::failure("oversize");
            assert_eq!(frame.opcode, Opcode::Failure);
            assert_eq!(frame.payload, json!({"reason": "oversize"}));
        }

        #[test]
        fn empty_frame_encodes_braces() {
            let bytes = Frame::empty(Opcode::Success).encode();
            assert_eq!(bytes, vec![0xF0, b'{', b'}']);
        }
    }
}
