//! Inbound frame dispatch.
//!
//! Decodes phone writes, validates their payloads, and routes each opcode
//! to the connection service, audio settings, scan control, or the sync
//! engine. Immediate acks come back as return values; asynchronous
//! results (sync cycles, connection phases) flow through the notifier and
//! the service event queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use syncsonic_bluetooth::{DeviceRegistry, ScanHandle, Scanner};
use syncsonic_core::{Frame, Mac, Opcode, SettingsPatch};
use syncsonic_service::{ConnectionService, ServiceError, ServiceEvent};
use syncsonic_sync::{SyncEngine, SyncError};

use crate::notifier::Notifier;

/// Wire form of one speaker's settings in a Connect request.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct WireSettings {
    volume: Option<u8>,
    latency: Option<u32>,
    balance: Option<f32>,
}

impl From<WireSettings> for SettingsPatch {
    fn from(w: WireSettings) -> Self {
        SettingsPatch {
            volume: w.volume,
            balance: w.balance,
            latency_ms: w.latency,
            muted: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireTarget {
    mac: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    target_speaker: WireTarget,
    #[serde(default)]
    settings: HashMap<String, WireSettings>,
    #[serde(default)]
    allowed: Vec<String>,
}

/// Routes decoded frames to the owning component.
pub struct Dispatcher {
    service: Arc<ConnectionService>,
    registry: Arc<Mutex<DeviceRegistry>>,
    sync: Arc<SyncEngine>,
    notifier: Notifier,
    events: mpsc::Sender<ServiceEvent>,
    /// Scan control; absent when the daemon runs without a scan adapter.
    scanner: Option<Scanner>,
    scan: Mutex<Option<ScanHandle>>,
    /// Reserved adapter, for the classic-pairing window.
    reserved: Option<bluer::Adapter>,
    pairing_window: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<ConnectionService>,
        registry: Arc<Mutex<DeviceRegistry>>,
        sync: Arc<SyncEngine>,
        notifier: Notifier,
        events: mpsc::Sender<ServiceEvent>,
        scanner: Option<Scanner>,
        reserved: Option<bluer::Adapter>,
        pairing_window: Duration,
    ) -> Self {
        Self {
            service,
            registry,
            sync,
            notifier,
            events,
            scanner,
            scan: Mutex::new(None),
            reserved,
            pairing_window,
        }
    }

    /// Handle one characteristic write. Returns the immediate reply, or
    /// `None` when the result arrives later as a notification.
    pub async fn handle_write(&self, data: &[u8], mtu: usize) -> Option<Frame> {
        let frame = match Frame::decode(data, mtu) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Rejecting write: {}", e);
                return Some(Frame::failure(e.reason()));
            }
        };
        debug!("Handling {:?}", frame.opcode);

        match frame.opcode {
            Opcode::Ping => Some(self.ping(&frame.payload)),
            Opcode::ConnectOne => Some(self.connect_one(frame.payload).await),
            Opcode::Disconnect => Some(self.disconnect(&frame.payload).await),
            Opcode::SetLatency => Some(self.set_latency(&frame.payload).await),
            Opcode::SetVolume => Some(self.set_volume(&frame.payload).await),
            Opcode::GetPairedDevices => Some(self.get_paired().await),
            Opcode::SetMute => Some(self.set_mute(&frame.payload).await),
            Opcode::ScanStart => Some(self.scan_start().await),
            Opcode::ScanStop => Some(self.scan_stop().await),
            Opcode::StartClassicPairing => Some(self.start_classic_pairing().await),
            Opcode::UltrasonicSync => {
                self.spawn_sync();
                None
            }
            // Server-to-phone opcodes are not valid writes.
            Opcode::Pong
            | Opcode::Error
            | Opcode::ScanDevice
            | Opcode::ConnectionStatus
            | Opcode::Success
            | Opcode::Failure => Some(Frame::failure("unknown_opcode")),
        }
    }

    fn ping(&self, payload: &Value) -> Frame {
        let count = payload.get("count").cloned().unwrap_or(json!(0));
        Frame::new(Opcode::Pong, json!({ "count": count }))
    }

    async fn connect_one(&self, payload: Value) -> Frame {
        let request: ConnectRequest = match serde_json::from_value(payload) {
            Ok(request) => request,
            Err(e) => {
                debug!("Malformed connect request: {}", e);
                return Frame::failure("malformed_json");
            }
        };
        let Ok(mac) = Mac::parse(&request.target_speaker.mac) else {
            return Frame::failure("malformed_json");
        };

        // Settings arrive keyed by MAC string; canonicalize before lookup.
        let patch = request
            .settings
            .iter()
            .find(|(key, _)| Mac::parse(key) == Ok(mac))
            .map(|(_, w)| SettingsPatch::from(*w))
            .unwrap_or_default();

        let mut allowed = Vec::with_capacity(request.allowed.len());
        for raw in &request.allowed {
            match Mac::parse(raw) {
                Ok(mac) => allowed.push(mac),
                Err(_) => return Frame::failure("malformed_json"),
            }
        }

        info!("Connect request for {} ({})", mac, request.target_speaker.name);
        match self
            .service
            .connect(mac, &request.target_speaker.name, patch, &allowed)
            .await
        {
            Ok(()) => Frame::success(json!({ "queued": true })),
            Err(e) => Frame::failure(service_reason(&e)),
        }
    }

    async fn disconnect(&self, payload: &Value) -> Frame {
        let Some(mac) = mac_field(payload, "mac") else {
            return Frame::failure("malformed_json");
        };
        match self.service.disconnect(mac).await {
            Ok(()) => Frame::success(json!({ "queued": true })),
            Err(e) => Frame::failure(service_reason(&e)),
        }
    }

    async fn set_latency(&self, payload: &Value) -> Frame {
        let Some(mac) = mac_field(payload, "mac") else {
            return Frame::failure("malformed_json");
        };
        let Some(latency) = payload.get("latency").and_then(Value::as_u64) else {
            return Frame::failure("malformed_json");
        };
        match self.service.set_latency(mac, latency.min(500) as u32).await {
            Ok(()) => Frame::success(json!({})),
            Err(e) => Frame::failure(service_reason(&e)),
        }
    }

    async fn set_volume(&self, payload: &Value) -> Frame {
        let Some(mac) = mac_field(payload, "mac") else {
            return Frame::failure("malformed_json");
        };
        let Some(volume) = payload.get("volume").and_then(Value::as_u64) else {
            return Frame::failure("malformed_json");
        };
        let balance = payload
            .get("balance")
            .and_then(Value::as_f64)
            .unwrap_or(0.5) as f32;
        match self
            .service
            .set_volume(mac, volume.min(100) as u8, balance)
            .await
        {
            Ok(()) => Frame::success(json!({})),
            Err(e) => Frame::failure(service_reason(&e)),
        }
    }

    async fn set_mute(&self, payload: &Value) -> Frame {
        let Some(mac) = mac_field(payload, "mac") else {
            return Frame::failure("malformed_json");
        };
        let Some(mute) = payload.get("mute").and_then(Value::as_bool) else {
            return Frame::failure("malformed_json");
        };
        match self.service.set_mute(mac, mute).await {
            Ok(()) => Frame::success(json!({})),
            Err(e) => Frame::failure(service_reason(&e)),
        }
    }

    async fn get_paired(&self) -> Frame {
        let paired = self.registry.lock().await.paired_list();
        let map: serde_json::Map<String, Value> = paired
            .into_iter()
            .map(|(mac, name)| (mac.to_string(), Value::String(name)))
            .collect();
        Frame::success(Value::Object(map))
    }

    async fn scan_start(&self) -> Frame {
        let mut scan = self.scan.lock().await;
        if scan.is_some() {
            return Frame::failure("scan_active");
        }
        let Some(scanner) = &self.scanner else {
            return Frame::failure("scan_unavailable");
        };

        let (tx, mut rx) = mpsc::channel(32);
        let handle = match scanner.start(tx).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Scan start failed: {}", e);
                return Frame::failure("scan_failed");
            }
        };
        *scan = Some(handle);
        drop(scan);

        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(speaker) = rx.recv().await {
                {
                    let mut registry = registry.lock().await;
                    registry.upsert(speaker.mac, Some(&speaker.name), speaker.rssi);
                    if speaker.paired {
                        registry.mark_paired(speaker.mac);
                    }
                }
                let _ = events.send(ServiceEvent::ScanDevice(speaker)).await;
            }
        });

        self.service.set_scanning(true).await;
        Frame::success(json!({ "scanning": true }))
    }

    async fn scan_stop(&self) -> Frame {
        match self.scan.lock().await.take() {
            Some(handle) => {
                handle.stop();
                self.service.set_scanning(false).await;
                Frame::success(json!({ "scanning": false }))
            }
            None => Frame::failure("scan_inactive"),
        }
    }

    /// Open a classic-pairing window on the reserved adapter so the phone
    /// can complete the BLE-to-classic hand-off. Window length (and
    /// whether any adapter action happens at all) is configuration.
    async fn start_classic_pairing(&self) -> Frame {
        if self.pairing_window.is_zero() {
            return Frame::success(json!({}));
        }
        if let Some(adapter) = &self.reserved {
            if let Err(e) = adapter.set_pairable(true).await {
                warn!("Could not open pairing window: {}", e);
                return Frame::failure("pairing_window_failed");
            }
            let _ = adapter.set_discoverable(true).await;
            info!("Pairing window open for {:?}", self.pairing_window);

            let adapter = adapter.clone();
            let window = self.pairing_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let _ = adapter.set_pairable(false).await;
                let _ = adapter.set_discoverable(false).await;
                info!("Pairing window closed");
            });
        }
        Frame::success(json!({}))
    }

    /// One sync cycle runs in the background; the phone hears back with a
    /// single notification when it finishes.
    fn spawn_sync(&self) {
        let sync = Arc::clone(&self.sync);
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            match sync.run_once().await {
                Ok(outcome) => {
                    info!(
                        "Sync finished: delta {:.1} ms, adjusted {:?}",
                        outcome.delta_ms, outcome.adjusted
                    );
                    notifier.publish(Frame::success(json!({
                        "delta_ms": outcome.delta_ms,
                        "adjusted": outcome.adjusted,
                    })));
                }
                Err(e) => {
                    warn!("Sync failed: {}", e);
                    notifier.publish(Frame::failure(sync_reason(&e)));
                }
            }
        });
    }
}

/// Render a service event as its notification frame. `Fatal` has no wire
/// form; the supervisor consumes it.
pub fn event_to_frame(event: &ServiceEvent) -> Option<Frame> {
    match event {
        ServiceEvent::Phase(phase) => Some(phase.to_frame()),
        ServiceEvent::Snapshot(status) => Some(status.to_frame()),
        ServiceEvent::ScanDevice(speaker) => Some(Frame::new(
            Opcode::ScanDevice,
            json!({
                "device": {
                    "mac": speaker.mac,
                    "name": speaker.name,
                    "paired": speaker.paired,
                }
            }),
        )),
        ServiceEvent::Fatal(_) => None,
    }
}

fn mac_field(payload: &Value, key: &str) -> Option<Mac> {
    payload
        .get(key)?
        .as_str()
        .and_then(|raw| Mac::parse(raw).ok())
}

fn service_reason(error: &ServiceError) -> &'static str {
    match error {
        ServiceError::Busy(_) => "busy",
        ServiceError::NotAllowed(_) => "not_allowed",
        ServiceError::Audio(syncsonic_audio::AudioError::NotRouted(_)) => "not_routed",
        ServiceError::Audio(_) => "routing_failed",
        ServiceError::Bluetooth(_) => "adapter_unavailable",
    }
}

fn sync_reason(error: &SyncError) -> &'static str {
    match error {
        SyncError::Busy => "sync_busy",
        SyncError::NeedTwoSpeakers(_) => "need_two_speakers",
        SyncError::MicUnavailable(_) => "mic_unavailable",
        SyncError::BurstsNotFound => "bursts_not_found",
        SyncError::Timeout => "sync_timeout",
        _ => "sync_failed",
    }
}
