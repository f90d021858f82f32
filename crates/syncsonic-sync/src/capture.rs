//! Microphone capture.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::chirp::SAMPLE_RATE;
use crate::error::{Result, SyncError};

/// Records the room through the USB microphone.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait MicCapture: Send + Sync {
    /// Record `seconds` of mono audio into a WAV at `path`.
    async fn record(&self, path: &Path, seconds: u32) -> Result<()>;
}

/// Production capture via `arecord`.
#[derive(Debug, Default)]
pub struct ArecordCapture {
    /// Explicit ALSA device (`-D`), or the default capture device.
    device: Option<String>,
}

impl ArecordCapture {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl MicCapture for ArecordCapture {
    async fn record(&self, path: &Path, seconds: u32) -> Result<()> {
        let mut cmd = Command::new("arecord");
        cmd.args(["-f", "S16_LE", "-r"])
            .arg(SAMPLE_RATE.to_string())
            .args(["-c", "1", "-d"])
            .arg(seconds.to_string())
            .arg("-q")
            .arg(path);
        if let Some(device) = &self.device {
            cmd.args(["-D", device]);
        }

        debug!("Recording {}s of mic input to {}", seconds, path.display());
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(SyncError::MicUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}
