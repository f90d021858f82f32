//! Sound-server backend trait.
//!
//! The router drives a local sound-server through this trait; the
//! production implementation shells out to `pactl`/`paplay`, tests use a
//! mock.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Command surface of the local sound-server.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Verify the server answers and the shared `virtual_out` null sink
    /// exists (creating it when missing).
    async fn ensure_ready(&self) -> Result<()>;

    /// Resolve a sink whose name starts with `prefix`, if one exists.
    async fn find_sink(&self, prefix: &str) -> Result<Option<String>>;

    /// Unload every loopback module feeding `sink`.
    async fn unload_loopbacks(&self, sink: &str) -> Result<()>;

    /// Create a loopback `virtual_out.monitor -> sink` with the given
    /// playback-buffer target.
    async fn load_loopback(&self, sink: &str, latency_ms: u32) -> Result<()>;

    /// Set per-channel sink volume in percent.
    async fn set_sink_volume(&self, sink: &str, left: u32, right: u32) -> Result<()>;

    /// Mute or unmute a sink.
    async fn set_sink_mute(&self, sink: &str, mute: bool) -> Result<()>;

    /// Play a WAV file to one sink only, blocking until playback ends.
    async fn play_wav(&self, sink: &str, path: &Path) -> Result<()>;
}
