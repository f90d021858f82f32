//! # syncsonic-audio
//!
//! Audio routing glue between the phone-sourced stream and each connected
//! speaker sink.
//!
//! The daemon plays everything into a `virtual_out` null sink; one
//! loopback per speaker copies that stream into the speaker's A2DP sink
//! with its own volume, balance, latency, and mute. The sound-server is
//! driven through its command surface (`pactl`), wrapped in the
//! [`AudioBackend`] trait so routing logic is testable without PulseAudio.

pub mod backend;
pub mod error;
pub mod pactl;
pub mod router;
pub mod volume;

pub use backend::AudioBackend;
pub use error::{AudioError, Result};
pub use pactl::PactlBackend;
pub use router::AudioRouter;
pub use volume::channel_gains;
