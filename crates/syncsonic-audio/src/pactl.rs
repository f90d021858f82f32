//! PulseAudio command-line backend.
//!
//! Drives the sound-server with `pactl`/`paplay` subprocesses, matching
//! the deployment where PulseAudio runs headless under the same user and
//! is reachable through its standard socket.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::backend::AudioBackend;
use crate::error::{AudioError, Result};

/// Name of the shared null sink every loopback reads from.
const VIRTUAL_SINK: &str = "virtual_out";

/// Production backend shelling out to the PulseAudio CLI tools.
#[derive(Debug, Default)]
pub struct PactlBackend;

impl PactlBackend {
    pub fn new() -> Self {
        Self
    }

    async fn pactl(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("pactl").args(args).output().await?;
        if !output.status.success() {
            return Err(AudioError::CommandFailed {
                command: format!("pactl {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn pactl_stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.pactl(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn server_responds(&self) -> bool {
        matches!(
            self.pactl_stdout(&["info"]).await,
            Ok(out) if out.contains("Server Name")
        )
    }
}

#[async_trait]
impl AudioBackend for PactlBackend {
    async fn ensure_ready(&self) -> Result<()> {
        if !self.server_responds().await {
            warn!("PulseAudio not responding, attempting to start it");
            let _ = Command::new("pulseaudio")
                .args(["--start", "--exit-idle-time=-1"])
                .status()
                .await;

            let mut up = false;
            for attempt in 1..=5 {
                if self.server_responds().await {
                    info!("PulseAudio started after {} attempt(s)", attempt);
                    up = true;
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if !up {
                return Err(AudioError::ServerUnavailable(
                    "pactl info did not answer after restart".to_string(),
                ));
            }
        }

        let sinks = self.pactl_stdout(&["list", "short", "sinks"]).await?;
        if sinks.contains(VIRTUAL_SINK) {
            debug!("Sink '{}' already exists", VIRTUAL_SINK);
        } else {
            info!("Creating virtual sink '{}'", VIRTUAL_SINK);
            self.pactl(&[
                "load-module",
                "module-null-sink",
                &format!("sink_name={VIRTUAL_SINK}"),
                &format!("sink_properties=device.description={VIRTUAL_SINK}"),
            ])
            .await?;
        }

        self.pactl(&["set-default-sink", VIRTUAL_SINK]).await?;
        info!("Sound-server ready; default sink is {}", VIRTUAL_SINK);
        Ok(())
    }

    async fn find_sink(&self, prefix: &str) -> Result<Option<String>> {
        let out = self.pactl_stdout(&["list", "sinks", "short"]).await?;
        for line in out.lines() {
            let mut parts = line.split_whitespace();
            let _index = parts.next();
            if let Some(name) = parts.next() {
                if name.starts_with(prefix) {
                    return Ok(Some(name.to_string()));
                }
            }
        }
        Ok(None)
    }

    async fn unload_loopbacks(&self, sink: &str) -> Result<()> {
        let out = self.pactl_stdout(&["list", "short", "modules"]).await?;
        for line in out.lines() {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() >= 2 && parts[1].contains("module-loopback") && line.contains(sink) {
                debug!("Unloading loopback module {} for {}", parts[0], sink);
                self.pactl(&["unload-module", parts[0]]).await?;
            }
        }
        Ok(())
    }

    async fn load_loopback(&self, sink: &str, latency_ms: u32) -> Result<()> {
        self.pactl(&[
            "load-module",
            "module-loopback",
            &format!("source={VIRTUAL_SINK}.monitor"),
            &format!("sink={sink}"),
            "source_dont_move=true",
            &format!("latency_msec={latency_ms}"),
        ])
        .await
        .map_err(|e| {
            warn!("load-module loopback failed: {e}");
            AudioError::LoopbackFailed(sink.to_string())
        })?;
        info!("Loopback established for {} ({} ms)", sink, latency_ms);
        Ok(())
    }

    async fn set_sink_volume(&self, sink: &str, left: u32, right: u32) -> Result<()> {
        self.pactl(&[
            "set-sink-volume",
            sink,
            &format!("{left}%"),
            &format!("{right}%"),
        ])
        .await?;
        Ok(())
    }

    async fn set_sink_mute(&self, sink: &str, mute: bool) -> Result<()> {
        self.pactl(&["set-sink-mute", sink, if mute { "1" } else { "0" }])
            .await?;
        Ok(())
    }

    async fn play_wav(&self, sink: &str, path: &Path) -> Result<()> {
        let output = Command::new("paplay")
            .arg("-d")
            .arg(sink)
            .arg(path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(AudioError::CommandFailed {
                command: format!("paplay -d {sink}"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
