//! Connection service.
//!
//! Owns every per-speaker state machine, allocates adapters, serializes
//! conflicting operations through per-MAC cooperative locks, and
//! publishes status snapshots after every terminal transition. Two
//! different speakers may progress concurrently on different adapters;
//! operations on the same speaker are serialized.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use syncsonic_audio::AudioRouter;
use syncsonic_bluetooth::{AdapterInventory, DeviceRegistry, SpeakerLink};
use syncsonic_core::{AllowedScope, Mac, Phase, PhaseEvent, PiStatus, SettingsPatch};

use crate::error::{Result, ServiceError};
use crate::events::ServiceEvent;
use crate::fsm::{ConnectFsm, FsmOutcome};

struct FsmHandle {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
    adapter: String,
}

struct Shared {
    inventory: Arc<Mutex<AdapterInventory>>,
    registry: Arc<Mutex<DeviceRegistry>>,
    router: Arc<AudioRouter>,
    link: Arc<dyn SpeakerLink>,
    events: mpsc::Sender<ServiceEvent>,
    fsms: Mutex<HashMap<Mac, FsmHandle>>,
    mac_locks: Mutex<HashMap<Mac, Arc<Mutex<()>>>>,
    scanning: AtomicBool,
    /// Whitelist accumulated across Connects in session scope.
    session_allowed: Mutex<HashSet<Mac>>,
}

impl Shared {
    async fn snapshot(&self) -> PiStatus {
        PiStatus {
            connected: self.router.routed().await,
            scanning: self.scanning.load(Ordering::SeqCst),
        }
    }

    async fn publish_snapshot(&self) {
        let snapshot = self.snapshot().await;
        let _ = self.events.send(ServiceEvent::Snapshot(snapshot)).await;
    }

    async fn publish_phase(&self, event: PhaseEvent) {
        let _ = self.events.send(ServiceEvent::Phase(event)).await;
    }

    /// Terminal handling shared by every FSM task.
    async fn finish(&self, mac: Mac, adapter: String, outcome: FsmOutcome) {
        match outcome {
            FsmOutcome::Done => {
                self.inventory.lock().await.settle(&adapter);
                let mut registry = self.registry.lock().await;
                registry.mark_paired(mac);
                registry.mark_trusted(mac);
            }
            FsmOutcome::Failed(_) | FsmOutcome::Cancelled => {
                self.inventory.lock().await.release(&adapter, mac);
                self.registry.lock().await.set_adapter(mac, None);
            }
        }
        self.fsms.lock().await.remove(&mac);
        self.publish_snapshot().await;
    }
}

/// Orchestrates all speaker connections.
pub struct ConnectionService {
    shared: Arc<Shared>,
    allowed_scope: AllowedScope,
}

impl ConnectionService {
    pub fn new(
        inventory: Arc<Mutex<AdapterInventory>>,
        registry: Arc<Mutex<DeviceRegistry>>,
        router: Arc<AudioRouter>,
        link: Arc<dyn SpeakerLink>,
        events: mpsc::Sender<ServiceEvent>,
        allowed_scope: AllowedScope,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inventory,
                registry,
                router,
                link,
                events,
                fsms: Mutex::new(HashMap::new()),
                mac_locks: Mutex::new(HashMap::new()),
                scanning: AtomicBool::new(false),
                session_allowed: Mutex::new(HashSet::new()),
            }),
            allowed_scope,
        }
    }

    /// Start connecting one speaker. Synchronous failures (busy, not in
    /// the whitelist) come back as errors for the caller's ack; resource
    /// exhaustion and per-phase progress arrive as notifications.
    pub async fn connect(
        &self,
        mac: Mac,
        name: &str,
        settings: SettingsPatch,
        allowed: &[Mac],
    ) -> Result<()> {
        let shared = &self.shared;
        let _mac_guard = self.mac_lock(mac).await;

        self.check_allowed(mac, allowed).await?;

        let saved = {
            let mut registry = shared.registry.lock().await;
            registry.upsert(mac, Some(name), None);
            registry.set_settings(mac, settings)
        };

        {
            let mut fsms = shared.fsms.lock().await;
            if let Some(handle) = fsms.get(&mac) {
                if !handle.task.is_finished() {
                    return Err(ServiceError::Busy(mac));
                }
                fsms.remove(&mac);
            }
        }

        if shared.router.is_routed(mac).await {
            debug!("{} already connected and routed", mac);
            shared
                .publish_phase(PhaseEvent::new(Phase::ConnectSuccess, mac))
                .await;
            shared.publish_snapshot().await;
            return Ok(());
        }

        let adapter = {
            let mut inventory = shared.inventory.lock().await;
            match inventory.free_adapter().map(|a| a.name.clone()) {
                Some(name) => {
                    inventory.assign(&name, mac)?;
                    name
                }
                None => {
                    warn!("No free adapter for {}", mac);
                    shared
                        .publish_phase(PhaseEvent::new(Phase::NoAdapter, mac))
                        .await;
                    return Ok(());
                }
            }
        };
        shared
            .registry
            .lock()
            .await
            .set_adapter(mac, Some(adapter.clone()));
        info!("Connecting {} via {}", mac, adapter);

        let cancel = Arc::new(AtomicBool::new(false));
        let fsm = ConnectFsm::new(
            mac,
            adapter.clone(),
            saved,
            Arc::clone(&shared.link),
            Arc::clone(&shared.router),
            shared.events.clone(),
            Arc::clone(&cancel),
        );

        let task_shared = Arc::clone(shared);
        let task_adapter = adapter.clone();
        let task = tokio::spawn(async move {
            let outcome = fsm.run().await;
            task_shared.finish(mac, task_adapter, outcome).await;
        });

        shared.fsms.lock().await.insert(
            mac,
            FsmHandle {
                cancel,
                task,
                adapter,
            },
        );
        Ok(())
    }

    /// Disconnect a speaker: cancel its state machine cooperatively and
    /// tear down routing and the link regardless of FSM phase.
    pub async fn disconnect(&self, mac: Mac) -> Result<()> {
        let shared = &self.shared;
        let _mac_guard = self.mac_lock(mac).await;

        if let Some(handle) = shared.fsms.lock().await.remove(&mac) {
            debug!("Cancelling in-flight FSM for {}", mac);
            handle.cancel.store(true, Ordering::SeqCst);
            // The in-flight call is not interrupted; teardown proceeds
            // without waiting for its outcome.
            shared
                .inventory
                .lock()
                .await
                .release(&handle.adapter, mac);
        }

        let _ = shared.router.unroute(mac).await;

        let adapter = shared
            .inventory
            .lock()
            .await
            .adapter_for(mac)
            .map(|a| a.name.clone());
        if let Some(adapter) = adapter {
            if let Err(e) = shared.link.disconnect(&adapter, mac).await {
                warn!("Disconnect of {} on {} failed: {}", mac, adapter, e);
            }
            shared.inventory.lock().await.release(&adapter, mac);
        }
        shared.registry.lock().await.set_adapter(mac, None);

        shared
            .publish_phase(PhaseEvent::new(Phase::DisconnectDone, mac))
            .await;
        shared.publish_snapshot().await;
        Ok(())
    }

    pub async fn set_volume(&self, mac: Mac, volume: u8, balance: f32) -> Result<()> {
        let _mac_guard = self.mac_lock(mac).await;
        self.shared.registry.lock().await.set_settings(
            mac,
            SettingsPatch {
                volume: Some(volume),
                balance: Some(balance),
                ..Default::default()
            },
        );
        self.shared.router.set_volume(mac, volume, balance).await?;
        Ok(())
    }

    pub async fn set_latency(&self, mac: Mac, latency_ms: u32) -> Result<()> {
        let _mac_guard = self.mac_lock(mac).await;
        self.shared.registry.lock().await.set_settings(
            mac,
            SettingsPatch {
                latency_ms: Some(latency_ms),
                ..Default::default()
            },
        );
        self.shared.router.set_latency(mac, latency_ms).await?;
        Ok(())
    }

    pub async fn set_mute(&self, mac: Mac, muted: bool) -> Result<()> {
        let _mac_guard = self.mac_lock(mac).await;
        self.shared.registry.lock().await.set_settings(
            mac,
            SettingsPatch {
                muted: Some(muted),
                ..Default::default()
            },
        );
        self.shared.router.set_mute(mac, muted).await?;
        Ok(())
    }

    /// Current Pi-Status.
    pub async fn snapshot(&self) -> PiStatus {
        self.shared.snapshot().await
    }

    /// Flip the scanning flag and publish the changed snapshot.
    pub async fn set_scanning(&self, scanning: bool) {
        self.shared.scanning.store(scanning, Ordering::SeqCst);
        self.shared.publish_snapshot().await;
    }

    /// React to an assignable adapter disappearing: the owning FSM (if
    /// any) aborts with `adapter_lost` and the speaker is unrouted.
    pub async fn adapter_lost(&self, adapter: &str, assigned: Option<Mac>) {
        let Some(mac) = assigned else { return };
        warn!("Adapter {} lost while holding {}", adapter, mac);

        if let Some(handle) = self.shared.fsms.lock().await.remove(&mac) {
            handle.cancel.store(true, Ordering::SeqCst);
        }
        let _ = self.shared.router.unroute(mac).await;
        self.shared.registry.lock().await.set_adapter(mac, None);

        self.shared
            .publish_phase(PhaseEvent::new(Phase::AdapterLost, mac))
            .await;
        self.shared.publish_snapshot().await;
    }

    /// Daemon shutdown: cancel every FSM and drop every loopback.
    pub async fn shutdown(&self) {
        info!("Connection service shutting down");
        let mut fsms = self.shared.fsms.lock().await;
        for (mac, handle) in fsms.drain() {
            debug!("Cancelling FSM for {}", mac);
            handle.cancel.store(true, Ordering::SeqCst);
        }
        drop(fsms);
        self.shared.router.unroute_all().await;
    }

    async fn check_allowed(&self, mac: Mac, allowed: &[Mac]) -> Result<()> {
        match self.allowed_scope {
            AllowedScope::Connect => {
                if !allowed.is_empty() && !allowed.contains(&mac) {
                    return Err(ServiceError::NotAllowed(mac));
                }
            }
            AllowedScope::Session => {
                let mut session = self.shared.session_allowed.lock().await;
                session.extend(allowed.iter().copied());
                if !session.is_empty() && !session.contains(&mac) {
                    return Err(ServiceError::NotAllowed(mac));
                }
            }
        }
        Ok(())
    }

    /// Per-MAC cooperative lock serializing operations on one speaker.
    async fn mac_lock(&self, mac: Mac) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.shared.mac_locks.lock().await;
            Arc::clone(locks.entry(mac).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        lock.lock_owned().await
    }
}
