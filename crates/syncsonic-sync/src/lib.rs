//! # syncsonic-sync
//!
//! Ultrasonic auto-sync: plays one 19 kHz chirp through each of two
//! connected speakers, records the room through the USB microphone,
//! locates the two burst onsets, and corrects the leading speaker's
//! loopback latency by the measured delta.
//!
//! Each cycle persists a debug bundle (recording, spectrogram, metadata)
//! to a well-known directory for offline inspection.

pub mod capture;
pub mod chirp;
pub mod detect;
pub mod engine;
pub mod error;

pub use capture::{ArecordCapture, MicCapture};
pub use chirp::write_chirp_wav;
pub use detect::detect_two_bursts;
pub use engine::{SyncEngine, SyncOutcome};
pub use error::{Result, SyncError};
