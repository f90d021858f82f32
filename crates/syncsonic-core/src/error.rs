//! Error types for core protocol and configuration handling.

use thiserror::Error;

/// Errors produced while parsing a speaker MAC address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was not six colon-separated octets.
    #[error("invalid MAC address: {0}")]
    Invalid(String),
}

/// Errors produced while decoding an inbound control frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Zero-length write; there is no opcode byte to read.
    #[error("empty frame")]
    Empty,

    /// First byte is not a known opcode.
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// Payload bytes are not valid UTF-8 JSON.
    #[error("malformed JSON payload: {0}")]
    MalformedJson(String),

    /// Payload exceeds the negotiated MTU minus the opcode byte.
    #[error("payload exceeds negotiated MTU")]
    Oversize,
}

impl FrameError {
    /// Reason string sent back to the phone in a failure frame.
    pub fn reason(&self) -> &'static str {
        match self {
            FrameError::Empty | FrameError::MalformedJson(_) => "malformed_json",
            FrameError::UnknownOpcode(_) => "unknown_opcode",
            FrameError::Oversize => "oversize",
        }
    }
}

/// Errors produced while reading daemon configuration from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to a value we cannot interpret.
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_error_reasons() {
        assert_eq!(FrameError::Empty.reason(), "malformed_json");
        assert_eq!(FrameError::UnknownOpcode(0x99).reason(), "unknown_opcode");
        assert_eq!(
            FrameError::MalformedJson("eof".into()).reason(),
            "malformed_json"
        );
        assert_eq!(FrameError::Oversize.reason(), "oversize");
    }

    #[test]
    fn error_display_formats() {
        let err = FrameError::UnknownOpcode(0xAB);
        assert!(err.to_string().contains("0xab"));

        let err = ConfigError::InvalidValue {
            var: "SYNCSONIC_VOLUME_CURVE",
            value: "loud".into(),
        };
        assert!(err.to_string().contains("SYNCSONIC_VOLUME_CURVE"));
        assert!(err.to_string().contains("loud"));
    }
}
