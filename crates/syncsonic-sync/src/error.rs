//! Error types for ultrasonic sync.

use thiserror::Error;

/// Ultrasonic sync error types.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Sync needs exactly two connected speakers.
    #[error("need exactly 2 connected speakers, found {0}")]
    NeedTwoSpeakers(usize),

    /// The microphone is missing or recording failed.
    #[error("microphone unavailable: {0}")]
    MicUnavailable(String),

    /// Fewer than two 19 kHz bursts were found in the recording.
    #[error("could not detect two bursts in the recording")]
    BurstsNotFound,

    /// A sync cycle is already running.
    #[error("a sync cycle is already running")]
    Busy,

    /// The whole cycle overran its deadline.
    #[error("sync cycle timed out")]
    Timeout,

    /// Audio routing failed while playing or correcting.
    #[error(transparent)]
    Audio(#[from] syncsonic_audio::AudioError),

    /// WAV file problem.
    #[error("WAV error: {0}")]
    Wav(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for SyncError {
    fn from(e: hound::Error) -> Self {
        SyncError::Wav(e.to_string())
    }
}

/// Convenience Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
