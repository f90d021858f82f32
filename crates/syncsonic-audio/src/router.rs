//! Per-speaker loopback ownership.
//!
//! The router is the sole owner of loopback state: a loopback exists for a
//! speaker exactly while that speaker is connected-and-routed, and the
//! routed set feeds the Pi-Status snapshot. Callers ask for route/unroute
//! and setting changes; all sound-server work goes through the backend.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use syncsonic_core::{Mac, SpeakerSettings, VolumeCurve};

use crate::backend::AudioBackend;
use crate::error::{AudioError, Result};
use crate::volume::channel_gains;

/// How long to wait for a speaker's sink to appear after the link is up.
const SINK_WAIT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for the sink.
const SINK_POLL: Duration = Duration::from_millis(500);

struct Loopback {
    sink: String,
    settings: SpeakerSettings,
}

/// Creates and removes loopbacks and applies per-sink settings.
pub struct AudioRouter {
    backend: Arc<dyn AudioBackend>,
    curve: VolumeCurve,
    loopbacks: Mutex<HashMap<Mac, Loopback>>,
}

impl AudioRouter {
    pub fn new(backend: Arc<dyn AudioBackend>, curve: VolumeCurve) -> Self {
        Self {
            backend,
            curve,
            loopbacks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire a freshly connected speaker into the combined output and apply
    /// its saved settings.
    pub async fn route(&self, mac: Mac, settings: SpeakerSettings) -> Result<()> {
        let settings = settings.clamped();
        let sink = self.wait_for_sink(mac).await?;

        // A previous session may have left a loopback behind.
        self.backend.unload_loopbacks(&sink).await?;
        self.backend
            .load_loopback(&sink, settings.latency_ms)
            .await?;

        let (left, right) = channel_gains(settings.volume, settings.balance, self.curve);
        self.backend.set_sink_volume(&sink, left, right).await?;
        self.backend.set_sink_mute(&sink, settings.muted).await?;

        info!("Routed {} into {} ({:?})", mac, sink, settings);
        self.loopbacks
            .lock()
            .await
            .insert(mac, Loopback { sink, settings });
        Ok(())
    }

    /// Tear down the loopback for a speaker. Succeeds when none exists.
    pub async fn unroute(&self, mac: Mac) -> Result<()> {
        let removed = self.loopbacks.lock().await.remove(&mac);
        match removed {
            Some(loopback) => {
                debug!("Removing loopback for {}", mac);
                self.backend.unload_loopbacks(&loopback.sink).await
            }
            None => {
                // Still sweep by sink name; a crashed run may have left one.
                self.backend.unload_loopbacks(&mac.sink_name()).await
            }
        }
    }

    /// Tear down every loopback (daemon shutdown).
    pub async fn unroute_all(&self) {
        let macs: Vec<Mac> = self.loopbacks.lock().await.keys().copied().collect();
        for mac in macs {
            if let Err(e) = self.unroute(mac).await {
                warn!("Failed to unroute {} during shutdown: {}", mac, e);
            }
        }
    }

    /// Apply volume and balance to a routed speaker.
    pub async fn set_volume(&self, mac: Mac, volume: u8, balance: f32) -> Result<()> {
        let mut loopbacks = self.loopbacks.lock().await;
        let loopback = loopbacks
            .get_mut(&mac)
            .ok_or_else(|| AudioError::NotRouted(mac.to_string()))?;

        let volume = volume.min(100);
        let balance = balance.clamp(0.0, 1.0);
        let (left, right) = channel_gains(volume, balance, self.curve);
        self.backend
            .set_sink_volume(&loopback.sink, left, right)
            .await?;

        loopback.settings.volume = volume;
        loopback.settings.balance = balance;
        debug!("{} volume {} balance {:.2}", mac, volume, balance);
        Ok(())
    }

    /// Change a routed speaker's playback-buffer target. The loopback is
    /// rebuilt; the sound-server has no way to retune one in place.
    pub async fn set_latency(&self, mac: Mac, latency_ms: u32) -> Result<()> {
        let mut loopbacks = self.loopbacks.lock().await;
        let loopback = loopbacks
            .get_mut(&mac)
            .ok_or_else(|| AudioError::NotRouted(mac.to_string()))?;

        let latency_ms = latency_ms.min(500);
        self.backend.unload_loopbacks(&loopback.sink).await?;
        self.backend
            .load_loopback(&loopback.sink, latency_ms)
            .await?;

        // The rebuild resets sink-input state; reapply volume and mute.
        let (left, right) = channel_gains(
            loopback.settings.volume,
            loopback.settings.balance,
            self.curve,
        );
        self.backend
            .set_sink_volume(&loopback.sink, left, right)
            .await?;
        self.backend
            .set_sink_mute(&loopback.sink, loopback.settings.muted)
            .await?;

        loopback.settings.latency_ms = latency_ms;
        info!("{} latency -> {} ms", mac, latency_ms);
        Ok(())
    }

    /// Mute or unmute without touching the stored volume.
    pub async fn set_mute(&self, mac: Mac, muted: bool) -> Result<()> {
        let mut loopbacks = self.loopbacks.lock().await;
        let loopback = loopbacks
            .get_mut(&mac)
            .ok_or_else(|| AudioError::NotRouted(mac.to_string()))?;

        self.backend.set_sink_mute(&loopback.sink, muted).await?;
        loopback.settings.muted = muted;
        debug!("{} muted={}", mac, muted);
        Ok(())
    }

    /// Speakers currently routed, sorted. Feeds the Pi-Status snapshot.
    pub async fn routed(&self) -> BTreeSet<Mac> {
        self.loopbacks.lock().await.keys().copied().collect()
    }

    pub async fn is_routed(&self, mac: Mac) -> bool {
        self.loopbacks.lock().await.contains_key(&mac)
    }

    /// Settings currently applied to a routed speaker.
    pub async fn settings_of(&self, mac: Mac) -> Option<SpeakerSettings> {
        self.loopbacks.lock().await.get(&mac).map(|l| l.settings)
    }

    async fn wait_for_sink(&self, mac: Mac) -> Result<String> {
        let prefix = mac.sink_name();
        let deadline = tokio::time::Instant::now() + SINK_WAIT;
        loop {
            if let Some(sink) = self.backend.find_sink(&prefix).await? {
                return Ok(sink);
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("Sink {} did not appear within {:?}", prefix, SINK_WAIT);
                return Err(AudioError::SinkNotFound(prefix));
            }
            tokio::time::sleep(SINK_POLL).await;
        }
    }
}
