//! Per-speaker connection state machine.
//!
//! One instance drives one target speaker through
//! discovery -> pairing -> trust -> connect -> routing on an assigned
//! adapter. Retry counters are first-class state; failures are values
//! that transition states. Cancellation is cooperative: the flag is
//! observed between steps and at every retry boundary, and outcomes of
//! in-flight calls are discarded once cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use syncsonic_audio::AudioRouter;
use syncsonic_bluetooth::SpeakerLink;
use syncsonic_core::{Mac, Phase, PhaseEvent, SpeakerSettings};

use crate::events::ServiceEvent;

/// Inquiry deadline for the target speaker.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline per pairing attempt.
pub const PAIR_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(20);

/// Deadline per connect attempt.
pub const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pairing attempts before giving up.
pub const MAX_PAIR_ATTEMPTS: u32 = 3;

/// Connect attempts before giving up.
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Base backoff between pairing attempts; doubles per attempt.
const PAIR_BACKOFF: Duration = Duration::from_secs(1);

/// Terminal result of one state machine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmOutcome {
    /// Speaker is connected-and-routed.
    Done,
    /// Terminal failure; the phase names what went wrong.
    Failed(Phase),
    /// Cancelled by a disconnect or shutdown.
    Cancelled,
}

/// Connection state machine for one speaker.
pub struct ConnectFsm {
    mac: Mac,
    adapter: String,
    settings: SpeakerSettings,
    link: Arc<dyn SpeakerLink>,
    router: Arc<AudioRouter>,
    events: mpsc::Sender<ServiceEvent>,
    cancel: Arc<AtomicBool>,
}

impl ConnectFsm {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mac: Mac,
        adapter: String,
        settings: SpeakerSettings,
        link: Arc<dyn SpeakerLink>,
        router: Arc<AudioRouter>,
        events: mpsc::Sender<ServiceEvent>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            mac,
            adapter,
            settings,
            link,
            router,
            events,
            cancel,
        }
    }

    /// Drive the speaker to connected-and-routed or a terminal failure.
    pub async fn run(self) -> FsmOutcome {
        let outcome = self.drive().await;
        match &outcome {
            FsmOutcome::Done => info!("{}: connected and routed", self.mac),
            FsmOutcome::Failed(phase) => {
                warn!("{}: failed during {}", self.mac, phase.as_str())
            }
            FsmOutcome::Cancelled => info!("{}: cancelled", self.mac),
        }
        outcome
    }

    async fn drive(&self) -> FsmOutcome {
        self.emit(PhaseEvent::new(Phase::FsmStart, self.mac)).await;

        // Discovery
        if self.cancelled() {
            return FsmOutcome::Cancelled;
        }
        self.emit(PhaseEvent::new(Phase::DiscoveryStart, self.mac))
            .await;
        let found = self
            .link
            .discover(&self.adapter, self.mac, DISCOVERY_TIMEOUT)
            .await;
        if self.cancelled() {
            return FsmOutcome::Cancelled;
        }
        if let Err(e) = found {
            debug!("{}: discovery failed: {}", self.mac, e);
            self.emit(PhaseEvent::new(Phase::DiscoveryTimeout, self.mac))
                .await;
            return FsmOutcome::Failed(Phase::DiscoveryTimeout);
        }
        self.emit(PhaseEvent::new(Phase::DiscoveryComplete, self.mac))
            .await;

        // Pairing + trust, skipped when BlueZ already holds the pairing.
        let paired = self
            .link
            .is_paired(&self.adapter, self.mac)
            .await
            .unwrap_or(false);
        if self.cancelled() {
            return FsmOutcome::Cancelled;
        }
        if !paired {
            match self.pair_with_retries().await {
                Ok(()) => {}
                Err(outcome) => return outcome,
            }

            if self.cancelled() {
                return FsmOutcome::Cancelled;
            }
            self.emit(PhaseEvent::new(Phase::Trusting, self.mac)).await;
            let trusted = self.link.trust(&self.adapter, self.mac).await;
            if self.cancelled() {
                return FsmOutcome::Cancelled;
            }
            if let Err(e) = trusted {
                warn!("{}: trust failed: {}", self.mac, e);
                self.emit(PhaseEvent::new(Phase::TrustFailed, self.mac))
                    .await;
                return FsmOutcome::Failed(Phase::TrustFailed);
            }
        }

        // Connect
        match self.connect_with_retries().await {
            Ok(()) => {}
            Err(outcome) => return outcome,
        }

        // Routing
        if self.cancelled() {
            return FsmOutcome::Cancelled;
        }
        let routed = self.router.route(self.mac, self.settings).await;
        if self.cancelled() {
            let _ = self.router.unroute(self.mac).await;
            return FsmOutcome::Cancelled;
        }
        if let Err(e) = routed {
            warn!("{}: loopback creation failed: {}", self.mac, e);
            self.emit(PhaseEvent::new(Phase::LoopbackFailed, self.mac))
                .await;
            let _ = self.router.unroute(self.mac).await;
            return FsmOutcome::Failed(Phase::LoopbackFailed);
        }

        self.emit(PhaseEvent::new(Phase::ConnectSuccess, self.mac))
            .await;
        FsmOutcome::Done
    }

    async fn pair_with_retries(&self) -> Result<(), FsmOutcome> {
        let mut attempt = 0;
        loop {
            if self.cancelled() {
                return Err(FsmOutcome::Cancelled);
            }
            attempt += 1;
            self.emit(PhaseEvent::new(Phase::PairingStart, self.mac))
                .await;

            let result = self
                .link
                .pair(&self.adapter, self.mac, PAIR_ATTEMPT_TIMEOUT)
                .await;
            if self.cancelled() {
                // Outcome of the in-flight call is discarded; no failure
                // event reaches the phone after a disconnect.
                return Err(FsmOutcome::Cancelled);
            }

            match result {
                Ok(()) => {
                    self.emit(PhaseEvent::new(Phase::PairingSuccess, self.mac))
                        .await;
                    return Ok(());
                }
                Err(e) => {
                    debug!("{}: pairing attempt {} failed: {}", self.mac, attempt, e);
                    self.emit(PhaseEvent::with_attempt(
                        Phase::PairingFailed,
                        self.mac,
                        attempt,
                    ))
                    .await;
                    if attempt >= MAX_PAIR_ATTEMPTS {
                        return Err(FsmOutcome::Failed(Phase::PairingFailed));
                    }
                    // Stale half-pairings make the next attempt fail too.
                    let _ = self.link.remove(&self.adapter, self.mac).await;
                    tokio::time::sleep(PAIR_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
            }
        }
    }

    async fn connect_with_retries(&self) -> Result<(), FsmOutcome> {
        let mut attempt = 0;
        loop {
            if self.cancelled() {
                return Err(FsmOutcome::Cancelled);
            }
            attempt += 1;
            self.emit(PhaseEvent::new(Phase::ConnectStart, self.mac))
                .await;

            let result = self
                .link
                .connect(&self.adapter, self.mac, CONNECT_ATTEMPT_TIMEOUT)
                .await;
            if self.cancelled() {
                return Err(FsmOutcome::Cancelled);
            }

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("{}: connect attempt {} failed: {}", self.mac, attempt, e);
                    self.emit(PhaseEvent::with_attempt(
                        Phase::ConnectFailed,
                        self.mac,
                        attempt,
                    ))
                    .await;
                    if attempt >= MAX_CONNECT_ATTEMPTS {
                        return Err(FsmOutcome::Failed(Phase::ConnectFailed));
                    }
                }
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: PhaseEvent) {
        if self.cancelled() {
            return;
        }
        let _ = self.events.send(ServiceEvent::Phase(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use syncsonic_audio::backend::MockAudioBackend;
    use syncsonic_bluetooth::link::MockSpeakerLink;
    use syncsonic_core::VolumeCurve;

    fn mac() -> Mac {
        Mac::parse("AA:BB:CC:DD:EE:01").unwrap()
    }

    fn router_ok() -> Arc<AudioRouter> {
        let mut backend = MockAudioBackend::new();
        backend
            .expect_find_sink()
            .returning(|prefix| Ok(Some(prefix.to_string())));
        backend.expect_unload_loopbacks().returning(|_| Ok(()));
        backend.expect_load_loopback().returning(|_, _| Ok(()));
        backend.expect_set_sink_volume().returning(|_, _, _| Ok(()));
        backend.expect_set_sink_mute().returning(|_, _| Ok(()));
        Arc::new(AudioRouter::new(
            Arc::new(backend),
            VolumeCurve::BalanceWeighted,
        ))
    }

    fn router_failing() -> Arc<AudioRouter> {
        let mut backend = MockAudioBackend::new();
        // Sink never appears -> routing fails after the wait.
        backend.expect_find_sink().returning(|_| Ok(None));
        backend.expect_unload_loopbacks().returning(|_| Ok(()));
        Arc::new(AudioRouter::new(
            Arc::new(backend),
            VolumeCurve::BalanceWeighted,
        ))
    }

    fn fsm(
        link: MockSpeakerLink,
        router: Arc<AudioRouter>,
        events: mpsc::Sender<ServiceEvent>,
        cancel: Arc<AtomicBool>,
    ) -> ConnectFsm {
        ConnectFsm::new(
            mac(),
            "hci1".to_string(),
            SpeakerSettings::default(),
            Arc::new(link),
            router,
            events,
            cancel,
        )
    }

    fn phases(events: &mut mpsc::Receiver<ServiceEvent>) -> Vec<(Phase, Option<u32>)> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServiceEvent::Phase(p) = event {
                out.push((p.phase, p.attempt));
            }
        }
        out
    }

    #[tokio::test]
    async fn known_speaker_runs_the_short_trace() {
        tokio::time::pause();
        let mut link = MockSpeakerLink::new();
        link.expect_discover().returning(|_, _, _| Ok(()));
        link.expect_is_paired().returning(|_, _| Ok(true));
        link.expect_connect().returning(|_, _, _| Ok(()));

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = fsm(link, router_ok(), tx, Arc::new(AtomicBool::new(false)))
            .run()
            .await;

        assert_eq!(outcome, FsmOutcome::Done);
        let trace: Vec<Phase> = phases(&mut rx).into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            trace,
            vec![
                Phase::FsmStart,
                Phase::DiscoveryStart,
                Phase::DiscoveryComplete,
                Phase::ConnectStart,
                Phase::ConnectSuccess,
            ]
        );
    }

    #[tokio::test]
    async fn unpaired_speaker_pairs_and_trusts_first() {
        tokio::time::pause();
        let mut link = MockSpeakerLink::new();
        link.expect_discover().returning(|_, _, _| Ok(()));
        link.expect_is_paired().returning(|_, _| Ok(false));
        link.expect_pair().returning(|_, _, _| Ok(()));
        link.expect_trust().returning(|_, _| Ok(()));
        link.expect_connect().returning(|_, _, _| Ok(()));

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = fsm(link, router_ok(), tx, Arc::new(AtomicBool::new(false)))
            .run()
            .await;

        assert_eq!(outcome, FsmOutcome::Done);
        let trace: Vec<Phase> = phases(&mut rx).into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            trace,
            vec![
                Phase::FsmStart,
                Phase::DiscoveryStart,
                Phase::DiscoveryComplete,
                Phase::PairingStart,
                Phase::PairingSuccess,
                Phase::Trusting,
                Phase::ConnectStart,
                Phase::ConnectSuccess,
            ]
        );
    }

    #[tokio::test]
    async fn discovery_timeout_is_terminal() {
        let mut link = MockSpeakerLink::new();
        link.expect_discover().returning(|_, mac, _| {
            Err(syncsonic_bluetooth::BluetoothError::DiscoveryTimeout(
                mac.to_string(),
            ))
        });

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = fsm(link, router_ok(), tx, Arc::new(AtomicBool::new(false)))
            .run()
            .await;

        assert_eq!(outcome, FsmOutcome::Failed(Phase::DiscoveryTimeout));
        let trace: Vec<Phase> = phases(&mut rx).into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            trace,
            vec![
                Phase::FsmStart,
                Phase::DiscoveryStart,
                Phase::DiscoveryTimeout,
            ]
        );
    }

    #[tokio::test]
    async fn pairing_retries_then_succeeds() {
        tokio::time::pause();
        let mut link = MockSpeakerLink::new();
        link.expect_discover().returning(|_, _, _| Ok(()));
        link.expect_is_paired().returning(|_, _| Ok(false));

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_mock = Arc::clone(&calls);
        link.expect_pair().returning(move |_, _, _| {
            if calls_in_mock.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(syncsonic_bluetooth::BluetoothError::PairingFailed(
                    "rejected".into(),
                ))
            } else {
                Ok(())
            }
        });
        link.expect_remove().times(2).returning(|_, _| Ok(()));
        link.expect_trust().returning(|_, _| Ok(()));
        link.expect_connect().returning(|_, _, _| Ok(()));

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = fsm(link, router_ok(), tx, Arc::new(AtomicBool::new(false)))
            .run()
            .await;

        assert_eq!(outcome, FsmOutcome::Done);
        let trace = phases(&mut rx);
        let failed_attempts: Vec<u32> = trace
            .iter()
            .filter(|(p, _)| *p == Phase::PairingFailed)
            .filter_map(|(_, attempt)| *attempt)
            .collect();
        assert_eq!(failed_attempts, vec![1, 2]);
        assert!(trace.iter().any(|(p, _)| *p == Phase::PairingSuccess));
    }

    #[tokio::test]
    async fn pairing_exhaustion_is_terminal() {
        tokio::time::pause();
        let mut link = MockSpeakerLink::new();
        link.expect_discover().returning(|_, _, _| Ok(()));
        link.expect_is_paired().returning(|_, _| Ok(false));
        link.expect_pair().times(3).returning(|_, _, _| {
            Err(syncsonic_bluetooth::BluetoothError::PairingFailed(
                "rejected".into(),
            ))
        });
        link.expect_remove().returning(|_, _| Ok(()));

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = fsm(link, router_ok(), tx, Arc::new(AtomicBool::new(false)))
            .run()
            .await;

        assert_eq!(outcome, FsmOutcome::Failed(Phase::PairingFailed));
        let failures = phases(&mut rx)
            .into_iter()
            .filter(|(p, _)| *p == Phase::PairingFailed)
            .count();
        assert_eq!(failures, 3);
    }

    #[tokio::test]
    async fn connect_exhaustion_is_terminal() {
        tokio::time::pause();
        let mut link = MockSpeakerLink::new();
        link.expect_discover().returning(|_, _, _| Ok(()));
        link.expect_is_paired().returning(|_, _| Ok(true));
        link.expect_connect().times(3).returning(|_, _, _| {
            Err(syncsonic_bluetooth::BluetoothError::ConnectionFailed(
                "page timeout".into(),
            ))
        });

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = fsm(link, router_ok(), tx, Arc::new(AtomicBool::new(false)))
            .run()
            .await;

        assert_eq!(outcome, FsmOutcome::Failed(Phase::ConnectFailed));
        let attempts: Vec<u32> = phases(&mut rx)
            .into_iter()
            .filter(|(p, _)| *p == Phase::ConnectFailed)
            .filter_map(|(_, a)| a)
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn loopback_failure_leaves_link_up_but_unrouted() {
        tokio::time::pause();
        let mut link = MockSpeakerLink::new();
        link.expect_discover().returning(|_, _, _| Ok(()));
        link.expect_is_paired().returning(|_, _| Ok(true));
        link.expect_connect().returning(|_, _, _| Ok(()));
        // No disconnect expectation: the link stays up.

        let router = router_failing();
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = fsm(link, Arc::clone(&router), tx, Arc::new(AtomicBool::new(false)))
            .run()
            .await;

        assert_eq!(outcome, FsmOutcome::Failed(Phase::LoopbackFailed));
        assert!(!router.is_routed(mac()).await);
        let trace: Vec<Phase> = phases(&mut rx).into_iter().map(|(p, _)| p).collect();
        assert!(trace.contains(&Phase::LoopbackFailed));
        assert!(!trace.contains(&Phase::ConnectSuccess));
    }

    #[tokio::test]
    async fn cancellation_mid_pairing_suppresses_the_failure_event() {
        tokio::time::pause();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_in_mock = Arc::clone(&cancel);

        let mut link = MockSpeakerLink::new();
        link.expect_discover().returning(|_, _, _| Ok(()));
        link.expect_is_paired().returning(|_, _| Ok(false));
        // The disconnect lands while the pairing call is in flight; its
        // failure outcome must be discarded.
        link.expect_pair().returning(move |_, _, _| {
            cancel_in_mock.store(true, Ordering::SeqCst);
            Err(syncsonic_bluetooth::BluetoothError::PairingFailed(
                "rejected".into(),
            ))
        });

        let router = router_ok();
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = fsm(link, Arc::clone(&router), tx, cancel).run().await;

        assert_eq!(outcome, FsmOutcome::Cancelled);
        assert!(!router.is_routed(mac()).await);
        let trace: Vec<Phase> = phases(&mut rx).into_iter().map(|(p, _)| p).collect();
        assert!(!trace.contains(&Phase::PairingFailed));
        assert!(!trace.contains(&Phase::ConnectSuccess));
    }

    #[tokio::test]
    async fn cancellation_before_start_emits_nothing() {
        let link = MockSpeakerLink::new();
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = fsm(link, router_ok(), tx, Arc::new(AtomicBool::new(true)))
            .run()
            .await;

        assert_eq!(outcome, FsmOutcome::Cancelled);
        assert!(phases(&mut rx).is_empty());
    }
}
