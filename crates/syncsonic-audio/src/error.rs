//! Error types for audio routing.

use thiserror::Error;

/// Audio-routing error types.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The sound-server is not reachable.
    #[error("sound-server not available: {0}")]
    ServerUnavailable(String),

    /// The speaker's sink never appeared.
    #[error("sink not found: {0}")]
    SinkNotFound(String),

    /// A routing command was rejected by the sound-server.
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Creating the loopback failed.
    #[error("loopback creation failed for {0}")]
    LoopbackFailed(String),

    /// No loopback exists for the speaker.
    #[error("speaker {0} is not routed")]
    NotRouted(String),

    /// I/O error while spawning a backend command.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for audio operations.
pub type Result<T> = std::result::Result<T, AudioError>;
