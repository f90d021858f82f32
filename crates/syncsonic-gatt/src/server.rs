//! GATT application and advertisement on the reserved adapter.
//!
//! One primary service with one characteristic supporting read,
//! write-without-response, and notify; BlueZ provides the CCCD for the
//! notify side. Writes are dispatched as they arrive; notifications are
//! drained from the outbound queue in batches with snapshot coalescing.

use std::sync::Arc;

use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    characteristic_control, Application, ApplicationHandle, Characteristic, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicWrite, CharacteristicWriteMethod,
    Service,
};
use bluer::Adapter;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};
use uuid::Uuid;

use syncsonic_core::Frame;

use crate::dispatch::Dispatcher;
use crate::notifier::{coalesce, Notifier};

/// Primary service UUID, shared with the phone app.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x19b10000_e8f2_537e_4f6c_d104768a1214);

/// Control characteristic UUID.
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x19b10001_e8f2_537e_4f6c_d104768a1217);

/// Local name carried in the advertisement.
pub const ADVERTISED_NAME: &str = "Sync-Sonic";

/// Default ATT MTU assumed until a write reports the negotiated one.
const DEFAULT_MTU: usize = 23;

/// Running GATT server. Dropping it unregisters the application and stops
/// advertising.
pub struct GattServer {
    _app_handle: ApplicationHandle,
    _adv_handle: AdvertisementHandle,
}

impl GattServer {
    /// Register the application on the reserved adapter and start
    /// advertising. `frames` is the outbound queue the notify loop
    /// drains; immediate write replies are published to `notifier`.
    pub async fn start(
        adapter: Adapter,
        dispatcher: Arc<Dispatcher>,
        notifier: Notifier,
        frames: mpsc::Receiver<Frame>,
    ) -> bluer::Result<Self> {
        if !adapter.is_powered().await? {
            info!("Powering on advertising adapter {}", adapter.name());
            adapter.set_powered(true).await?;
        }

        let frames = Arc::new(Mutex::new(frames));
        let last_value: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        let (_char_control, char_control_handle) = characteristic_control();

        let write_dispatcher = Arc::clone(&dispatcher);
        let write_notifier = notifier.clone();
        let read_value = Arc::clone(&last_value);

        let characteristic = Characteristic {
            uuid: CHARACTERISTIC_UUID,
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(move |_req| {
                    let value = Arc::clone(&read_value);
                    Box::pin(async move { Ok(value.lock().await.clone()) })
                }),
                ..Default::default()
            }),
            write: Some(CharacteristicWrite {
                write: true,
                write_without_response: true,
                method: CharacteristicWriteMethod::Fun(Box::new(move |data, req| {
                    let dispatcher = Arc::clone(&write_dispatcher);
                    let notifier = write_notifier.clone();
                    Box::pin(async move {
                        let mtu = if req.mtu > 0 {
                            req.mtu as usize
                        } else {
                            DEFAULT_MTU
                        };
                        debug!("Write of {} bytes (MTU {})", data.len(), mtu);
                        if let Some(reply) = dispatcher.handle_write(&data, mtu).await {
                            notifier.publish(reply);
                        }
                        Ok(())
                    })
                })),
                ..Default::default()
            }),
            notify: Some(CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |mut bluez_notifier| {
                    let frames = Arc::clone(&frames);
                    let last_value = Arc::clone(&last_value);
                    Box::pin(async move {
                        debug!("Notification session started");
                        loop {
                            // Block for one frame, then drain whatever
                            // else arrived in the same tick.
                            let mut batch = Vec::new();
                            {
                                let mut rx = frames.lock().await;
                                match rx.recv().await {
                                    Some(frame) => batch.push(frame),
                                    None => break,
                                }
                                while let Ok(frame) = rx.try_recv() {
                                    batch.push(frame);
                                }
                            }

                            for frame in coalesce(batch) {
                                let bytes = frame.encode();
                                *last_value.lock().await = bytes.clone();
                                if let Err(e) = bluez_notifier.notify(bytes).await {
                                    error!("Notification failed: {}", e);
                                    return;
                                }
                            }
                        }
                        debug!("Notification session ended");
                    })
                })),
                ..Default::default()
            }),
            control_handle: char_control_handle,
            ..Default::default()
        };

        let app = Application {
            services: vec![Service {
                uuid: SERVICE_UUID,
                primary: true,
                characteristics: vec![characteristic],
                ..Default::default()
            }],
            ..Default::default()
        };

        let app_handle = adapter.serve_gatt_application(app).await?;
        info!("GATT application registered on {}", adapter.name());

        let advertisement = Advertisement {
            service_uuids: vec![SERVICE_UUID].into_iter().collect(),
            discoverable: Some(true),
            local_name: Some(ADVERTISED_NAME.to_string()),
            ..Default::default()
        };
        let adv_handle = adapter.advertise(advertisement).await?;
        info!(
            "Advertising '{}' on {} (service {})",
            ADVERTISED_NAME,
            adapter.name(),
            SERVICE_UUID
        );

        Ok(Self {
            _app_handle: app_handle,
            _adv_handle: adv_handle,
        })
    }
}
