//! One-shot ultrasonic sync cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use syncsonic_audio::{AudioBackend, AudioRouter};
use syncsonic_core::Mac;

use crate::capture::MicCapture;
use crate::chirp::{read_wav_mono, write_chirp_wav};
use crate::detect::{detect_two_bursts, write_spectrogram_csv};
use crate::error::{Result, SyncError};

/// Whole-cycle deadline.
const SYNC_TIMEOUT: Duration = Duration::from_secs(20);

/// Recording length. Long enough for both bursts plus their tails.
const RECORD_SECS: u32 = 8;

/// Pause between the two chirps, so their onsets cannot overlap in the
/// recording even with grossly mismatched latencies.
const SEND_SPACING: Duration = Duration::from_secs(5);

/// Settle time between starting the recorder and the first chirp.
const SETTLE: Duration = Duration::from_millis(200);

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Measured pairwise delay in milliseconds (positive: the first
    /// speaker leads).
    pub delta_ms: f64,
    /// Speaker whose latency was increased, when a correction was applied.
    pub adjusted: Option<Mac>,
    /// Detected burst onsets, seconds from recording start.
    pub t1: f64,
    pub t2: f64,
}

/// Runs ultrasonic sync cycles. Only one cycle may run at a time.
pub struct SyncEngine {
    router: Arc<AudioRouter>,
    backend: Arc<dyn AudioBackend>,
    capture: Arc<dyn MicCapture>,
    debug_dir: PathBuf,
    min_step_ms: f64,
    running: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        router: Arc<AudioRouter>,
        backend: Arc<dyn AudioBackend>,
        capture: Arc<dyn MicCapture>,
        debug_dir: PathBuf,
        min_step_ms: f64,
    ) -> Self {
        Self {
            router,
            backend,
            capture,
            debug_dir,
            min_step_ms,
            running: Mutex::new(()),
        }
    }

    /// Run one measure-and-correct cycle.
    pub async fn run_once(&self) -> Result<SyncOutcome> {
        let _guard = self.running.try_lock().map_err(|_| SyncError::Busy)?;
        timeout(SYNC_TIMEOUT, self.cycle())
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    async fn cycle(&self) -> Result<SyncOutcome> {
        let routed = self.router.routed().await;
        if routed.len() != 2 {
            return Err(SyncError::NeedTwoSpeakers(routed.len()));
        }
        let mut speakers = routed.into_iter();
        let (mac_a, mac_b) = match (speakers.next(), speakers.next()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(SyncError::NeedTwoSpeakers(0)),
        };
        info!("Sync cycle: {} vs {}", mac_a, mac_b);

        tokio::fs::create_dir_all(&self.debug_dir).await?;
        let chirp_path = self.debug_dir.join("chirp.wav");
        write_chirp_wav(&chirp_path)?;
        let recording_path = self.debug_dir.join("last_recording.wav");

        // Record the whole exchange while the chirps go out.
        let recorder = {
            let capture = Arc::clone(&self.capture);
            let path = recording_path.clone();
            tokio::spawn(async move { capture.record(&path, RECORD_SECS).await })
        };

        tokio::time::sleep(SETTLE).await;
        let t_send_a = Instant::now();
        self.backend.play_wav(&mac_a.sink_name(), &chirp_path).await?;

        tokio::time::sleep(SEND_SPACING).await;
        let t_send_b = Instant::now();
        self.backend.play_wav(&mac_b.sink_name(), &chirp_path).await?;

        recorder
            .await
            .map_err(|e| SyncError::MicUnavailable(e.to_string()))??;

        let send_spacing_sec = (t_send_b - t_send_a).as_secs_f64();
        let (samples, sample_rate) = read_wav_mono(&recording_path)?;

        let detected = detect_two_bursts(&samples, sample_rate);
        self.write_debug_bundle(&samples, sample_rate, detected, send_spacing_sec, mac_a, mac_b);

        let (t1, t2) = detected.ok_or(SyncError::BurstsNotFound)?;
        let delta_ms = ((t2 - t1) - send_spacing_sec) * 1000.0;
        info!(
            "Burst spacing {:.1} ms, send spacing {:.1} ms, delta {:.1} ms",
            (t2 - t1) * 1000.0,
            send_spacing_sec * 1000.0,
            delta_ms
        );

        if delta_ms.abs() < self.min_step_ms {
            info!("Already in sync (|delta| < {:.1} ms)", self.min_step_ms);
            return Ok(SyncOutcome {
                delta_ms,
                adjusted: None,
                t1,
                t2,
            });
        }

        // Positive delta: B arrived later than the send spacing implies,
        // so A leads and takes the extra delay; negative: B leads.
        let (leader, correction_ms) = if delta_ms > 0.0 {
            (mac_a, delta_ms)
        } else {
            (mac_b, -delta_ms)
        };
        let current = self
            .router
            .settings_of(leader)
            .await
            .map(|s| s.latency_ms)
            .unwrap_or_default();
        let target = current + correction_ms.round() as u32;
        info!(
            "{} leads by {:.1} ms; latency {} -> {} ms",
            leader, correction_ms, current, target
        );
        self.router.set_latency(leader, target).await?;

        Ok(SyncOutcome {
            delta_ms,
            adjusted: Some(leader),
            t1,
            t2,
        })
    }

    /// Persist the inspection bundle next to the recording. Failures only
    /// warn; the measurement itself already succeeded or failed on its own.
    fn write_debug_bundle(
        &self,
        samples: &[f32],
        sample_rate: u32,
        detected: Option<(f64, f64)>,
        send_spacing_sec: f64,
        mac_a: Mac,
        mac_b: Mac,
    ) {
        let spectrogram_path = self.debug_dir.join("spectrogram.csv");
        if let Err(e) = write_spectrogram_csv(samples, sample_rate, &spectrogram_path) {
            warn!("Could not write spectrogram: {}", e);
        }

        let meta = match detected {
            Some((t1, t2)) => format!(
                "t1={t1:.4}\nt2={t2:.4}\npeak_spacing_sec={:.4}\nsend_spacing_sec={send_spacing_sec:.4}\ndelta_ms={:.2}\nmac_a={mac_a}\nmac_b={mac_b}\n",
                t2 - t1,
                ((t2 - t1) - send_spacing_sec) * 1000.0,
            ),
            None => format!(
                "t1=none\nt2=none\npeaks_detected=0\nsend_spacing_sec={send_spacing_sec:.4}\nmac_a={mac_a}\nmac_b={mac_b}\n"
            ),
        };
        if let Err(e) = std::fs::write(self.debug_dir.join("last_sync_meta.txt"), meta) {
            warn!("Could not write sync metadata: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MockMicCapture;
    use crate::chirp::SAMPLE_RATE;
    use std::f32::consts::PI;
    use syncsonic_audio::backend::MockAudioBackend;
    use syncsonic_core::{SpeakerSettings, VolumeCurve};

    fn mac_a() -> Mac {
        Mac::parse("AA:00:00:00:00:01").unwrap()
    }

    fn mac_b() -> Mac {
        Mac::parse("BB:00:00:00:00:02").unwrap()
    }

    fn routed_router() -> Arc<AudioRouter> {
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

    fn write_synth_recording(path: &std::path::Path, onsets_sec: &[f32]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let rate = SAMPLE_RATE as f32;
        let total = (RECORD_SECS * SAMPLE_RATE) as usize;
        let burst_len = (0.2 * rate) as usize;
        for i in 0..total {
            let t = i as f32 / rate;
            let mut x = 0.0f32;
            for &onset in onsets_sec {
                if t >= onset && ((t - onset) * rate) < burst_len as f32 {
                    x += 0.5 * (2.0 * PI * 19_000.0 * (t - onset)).sin();
                }
            }
            writer.write_sample((x * i16::MAX as f32 * 0.9) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn play_backend() -> MockAudioBackend {
        let mut backend = MockAudioBackend::new();
        backend.expect_play_wav().returning(|_, _| Ok(()));
        backend
    }

    async fn route_both(router: &AudioRouter) {
        router
            .route(mac_a(), SpeakerSettings::default())
            .await
            .unwrap();
        router
            .route(mac_b(), SpeakerSettings::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn needs_two_connected_speakers() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(
            routed_router(),
            Arc::new(play_backend()),
            Arc::new(MockMicCapture::new()),
            dir.path().to_path_buf(),
            0.5,
        );
        let err = engine.run_once().await.unwrap_err();
        assert!(matches!(err, SyncError::NeedTwoSpeakers(0)));
    }

    #[tokio::test]
    async fn cycle_measures_delta_and_corrects_the_leader() {
        tokio::time::pause();
        let dir = tempfile::tempdir().unwrap();
        let router = routed_router();
        route_both(&router).await;

        // Send spacing is exactly 5 s under paused time; onsets 0.5 s and
        // 5.7 s put B 200 ms late, so A leads by 200 ms.
        let mut capture = MockMicCapture::new();
        capture.expect_record().returning(|path, _| {
            write_synth_recording(path, &[0.5, 5.7]);
            Ok(())
        });

        let engine = SyncEngine::new(
            Arc::clone(&router),
            Arc::new(play_backend()),
            Arc::new(capture),
            dir.path().to_path_buf(),
            0.5,
        );

        let outcome = engine.run_once().await.unwrap();
        assert!(
            (outcome.delta_ms - 200.0).abs() < 30.0,
            "delta = {}",
            outcome.delta_ms
        );
        assert_eq!(outcome.adjusted, Some(mac_a()));

        // The leader's loopback latency grew by the delta.
        let latency = router.settings_of(mac_a()).await.unwrap().latency_ms;
        let expected = SpeakerSettings::default().latency_ms + outcome.delta_ms.round() as u32;
        assert_eq!(latency, expected);

        // Debug bundle exists.
        assert!(dir.path().join("last_recording.wav").exists());
        assert!(dir.path().join("spectrogram.csv").exists());
        assert!(dir.path().join("last_sync_meta.txt").exists());
    }

    #[tokio::test]
    async fn small_delta_applies_no_correction() {
        tokio::time::pause();
        let dir = tempfile::tempdir().unwrap();
        let router = routed_router();
        route_both(&router).await;

        let mut capture = MockMicCapture::new();
        capture.expect_record().returning(|path, _| {
            // Onsets exactly 5 s apart: in sync.
            write_synth_recording(path, &[0.5, 5.5]);
            Ok(())
        });

        let engine = SyncEngine::new(
            Arc::clone(&router),
            Arc::new(play_backend()),
            Arc::new(capture),
            dir.path().to_path_buf(),
            30.0,
        );

        let outcome = engine.run_once().await.unwrap();
        assert!(outcome.adjusted.is_none());
        assert_eq!(
            router.settings_of(mac_a()).await.unwrap().latency_ms,
            SpeakerSettings::default().latency_ms
        );
    }

    #[tokio::test]
    async fn missing_bursts_fail_with_debug_meta() {
        tokio::time::pause();
        let dir = tempfile::tempdir().unwrap();
        let router = routed_router();
        route_both(&router).await;

        let mut capture = MockMicCapture::new();
        capture.expect_record().returning(|path, _| {
            write_synth_recording(path, &[]);
            Ok(())
        });

        let engine = SyncEngine::new(
            Arc::clone(&router),
            Arc::new(play_backend()),
            Arc::new(capture),
            dir.path().to_path_buf(),
            0.5,
        );

        let err = engine.run_once().await.unwrap_err();
        assert!(matches!(err, SyncError::BurstsNotFound));
        let meta = std::fs::read_to_string(dir.path().join("last_sync_meta.txt")).unwrap();
        assert!(meta.contains("peaks_detected=0"));
    }

    #[tokio::test]
    async fn mic_failure_is_reported() {
        tokio::time::pause();
        let dir = tempfile::tempdir().unwrap();
        let router = routed_router();
        route_both(&router).await;

        let mut capture = MockMicCapture::new();
        capture
            .expect_record()
            .returning(|_, _| Err(SyncError::MicUnavailable("no such device".into())));

        let engine = SyncEngine::new(
            Arc::clone(&router),
            Arc::new(play_backend()),
            Arc::new(capture),
            dir.path().to_path_buf(),
            0.5,
        );

        let err = engine.run_once().await.unwrap_err();
        assert!(matches!(err, SyncError::MicUnavailable(_)));
    }
}
