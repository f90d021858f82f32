//! SyncSonic daemon.
//!
//! Bootstraps the Bluetooth hub on a Raspberry Pi: claims the reserved
//! controller for BLE advertising, registers the pairing agent and the
//! GATT control service, prepares the sound-server, then runs a single
//! cooperative event loop that pumps service events out as notifications
//! and supervises bus-level adapter changes.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use syncsonic_audio::{AudioBackend, AudioRouter, PactlBackend};
use syncsonic_bluetooth::{
    register_pairing_agent, AdapterInventory, BluerLink, DeviceRegistry, InventoryEvent, Scanner,
};
use syncsonic_core::Config;
use syncsonic_gatt::{event_to_frame, Dispatcher, GattServer, Notifier, SERVICE_UUID};
use syncsonic_service::{ConnectionService, ServiceEvent};
use syncsonic_sync::{ArecordCapture, SyncEngine};

fn main() -> Result<()> {
    // One cooperative event loop; every component method runs on it.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(run())
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        "Starting SyncSonic daemon (reserved adapter: {})",
        config.reserved_hci.as_deref().unwrap_or("auto")
    );

    // Sound-server first; without audio there is nothing to orchestrate.
    let backend: Arc<dyn AudioBackend> = Arc::new(PactlBackend::new());
    backend
        .ensure_ready()
        .await
        .context("sound-server initialization failed")?;

    let session = bluer::Session::new()
        .await
        .context("cannot reach the BlueZ daemon")?;

    let inventory =
        AdapterInventory::new(session.clone(), config.reserved_hci.as_deref()).await?;
    let reserved_name = inventory.reserved_name().to_string();
    let reserved_adapter = session
        .adapter(&reserved_name)
        .context("reserved adapter vanished during startup")?;

    let _agent = register_pairing_agent(&session, &reserved_name).await?;

    let router = Arc::new(AudioRouter::new(Arc::clone(&backend), config.volume_curve));
    let registry = Arc::new(Mutex::new(DeviceRegistry::new()));
    let inventory = Arc::new(Mutex::new(inventory));
    let link = Arc::new(BluerLink::new(session.clone()));

    let (events_tx, mut events_rx) = mpsc::channel::<ServiceEvent>(256);
    let service = Arc::new(ConnectionService::new(
        Arc::clone(&inventory),
        Arc::clone(&registry),
        Arc::clone(&router),
        link,
        events_tx.clone(),
        config.allowed_scope,
    ));

    let sync = Arc::new(SyncEngine::new(
        Arc::clone(&router),
        Arc::clone(&backend),
        Arc::new(ArecordCapture::new(None)),
        config.debug_dir.clone(),
        config.min_sync_step_ms,
    ));

    let (notifier, frames_rx) = Notifier::new();
    let scanner = Scanner::new(session.clone(), reserved_name.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&service),
        Arc::clone(&registry),
        sync,
        notifier.clone(),
        events_tx.clone(),
        Some(scanner),
        Some(reserved_adapter.clone()),
        config.pairing_window,
    ));

    let _server =
        GattServer::start(reserved_adapter, dispatcher, notifier.clone(), frames_rx).await?;

    let session_events = session.events().await?;
    futures::pin_mut!(session_events);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    info!("SyncSonic daemon ready (service {})", SERVICE_UUID);

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else {
                    bail!("internal event queue closed");
                };
                if let ServiceEvent::Fatal(reason) = &event {
                    error!("Fatal: {}", reason);
                    service.shutdown().await;
                    bail!("fatal event: {reason}");
                }
                if let Some(frame) = event_to_frame(&event) {
                    notifier.publish(frame);
                }
            }

            bus_event = session_events.next() => {
                let Some(bus_event) = bus_event else {
                    error!("BlueZ session event stream ended");
                    service.shutdown().await;
                    bail!("bus disconnected");
                };
                match inventory.lock().await.handle_session_event(bus_event).await {
                    Some(InventoryEvent::ReservedLost) => {
                        error!("Reserved adapter lost; cannot continue");
                        service.shutdown().await;
                        bail!("reserved adapter lost");
                    }
                    Some(InventoryEvent::AdapterLost { name, assigned }) => {
                        service.adapter_lost(&name, assigned).await;
                    }
                    Some(InventoryEvent::AdapterAdded(name)) => {
                        info!("Adapter {} is now available", name);
                    }
                    None => {}
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                break;
            }

            _ = sigterm.recv() => {
                info!("Terminated; shutting down");
                break;
            }
        }
    }

    service.shutdown().await;
    info!("SyncSonic daemon stopped");
    Ok(())
}
