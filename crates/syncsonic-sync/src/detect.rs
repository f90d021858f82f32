//! Burst detection in the microphone recording.
//!
//! Pipeline: short-time 19 kHz band energy (Goertzel) -> threshold ->
//! contiguous segments -> refined onsets. The first two segments are the
//! two chirps; their onset spacing minus the send spacing is the
//! pairwise delay.

use std::f32::consts::PI;
use std::io::Write;
use std::path::Path;

use realfft::RealFftPlanner;
use tracing::warn;

use crate::chirp::BURST_FREQ_HZ;
use crate::error::Result;

/// Energy window length.
const ENERGY_WINDOW_MS: f32 = 10.0;

/// A window counts as burst when its band energy exceeds this fraction of
/// the recording's maximum. Low enough to catch the weaker first burst.
const THRESHOLD_FRAC: f32 = 0.1;

/// Shortest stretch of above-threshold windows that counts as a burst.
const MIN_DURATION_MS: f32 = 50.0;

/// Adjacent segments closer than this merge into one burst.
const MAX_GAP_MS: f32 = 100.0;

/// Onset refinement: first crossing above min + frac * (max - min).
const ONSET_REFINE_FRAC: f32 = 0.2;

/// Detect the onset times (seconds from recording start) of the first two
/// 19 kHz bursts. Returns `None` when fewer than two bursts are present.
pub fn detect_two_bursts(samples: &[f32], sample_rate: u32) -> Option<(f64, f64)> {
    let (times, energy) = band_energy(samples, sample_rate, BURST_FREQ_HZ);
    if energy.is_empty() {
        return None;
    }

    let max = energy.iter().fold(0.0f32, |m, &e| m.max(e));
    let threshold = (max * THRESHOLD_FRAC).max(1e-9);
    let above: Vec<bool> = energy.iter().map(|&e| e >= threshold).collect();

    let segments = find_segments(
        &times,
        &above,
        MIN_DURATION_MS / 1000.0,
        MAX_GAP_MS / 1000.0,
    );
    if segments.len() < 2 {
        warn!(
            "Found {} burst segment(s), need 2 (threshold {:.2e})",
            segments.len(),
            threshold
        );
        return None;
    }

    let t1 = refine_onset(&times, &energy, segments[0]);
    let t2 = refine_onset(&times, &energy, segments[1]);
    Some((t1 as f64, t2 as f64))
}

/// Short-time band energy at `freq` via the Goertzel algorithm.
/// Returns window-center times (seconds) and per-window RMS energy.
fn band_energy(samples: &[f32], sample_rate: u32, freq: f32) -> (Vec<f32>, Vec<f32>) {
    let window = ((sample_rate as f32 * ENERGY_WINDOW_MS / 1000.0) as usize).max(64);
    let hop = (window / 2).max(1);
    if samples.len() < window {
        return (Vec::new(), Vec::new());
    }

    let count = (samples.len() - window) / hop + 1;
    let mut times = Vec::with_capacity(count);
    let mut energy = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * hop;
        let chunk = &samples[start..start + window];
        times.push((start as f32 + window as f32 / 2.0) / sample_rate as f32);
        energy.push(goertzel(chunk, sample_rate as f32, freq));
    }
    (times, energy)
}

/// Single-bin DFT magnitude, normalized to an RMS-like scale.
fn goertzel(samples: &[f32], sample_rate: f32, freq: f32) -> f32 {
    let n = samples.len() as f32;
    let k = (0.5 + n * freq / sample_rate).floor();
    let omega = 2.0 * PI * k / n;
    let coeff = 2.0 * omega.cos();

    let (mut s1, mut s2) = (0.0f32, 0.0f32);
    for &x in samples {
        let s0 = x + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    let power = s1 * s1 + s2 * s2 - coeff * s1 * s2;
    (power.max(0.0) / n).sqrt()
}

/// Contiguous above-threshold stretches, merged when the gap between two
/// stretches is at most `max_gap_sec`, dropped when shorter than
/// `min_duration_sec`. Returns `(start_sec, end_sec)` pairs.
fn find_segments(
    times: &[f32],
    above: &[bool],
    min_duration_sec: f32,
    max_gap_sec: f32,
) -> Vec<(f32, f32)> {
    let mut segments: Vec<(f32, f32)> = Vec::new();
    let mut start: Option<f32> = None;

    let mut push = |segments: &mut Vec<(f32, f32)>, seg_start: f32, seg_end: f32| {
        if seg_end - seg_start < min_duration_sec {
            return;
        }
        if let Some(last) = segments.last_mut() {
            if seg_start - last.1 <= max_gap_sec {
                last.1 = seg_end;
                return;
            }
        }
        segments.push((seg_start, seg_end));
    };

    for i in 0..above.len() {
        match (above[i], start) {
            (true, None) => start = Some(times[i]),
            (false, Some(seg_start)) => {
                push(&mut segments, seg_start, times[i.saturating_sub(1)]);
                start = None;
            }
            _ => {}
        }
    }
    if let (Some(seg_start), Some(&last_time)) = (start, times.last()) {
        push(&mut segments, seg_start, last_time);
    }
    segments
}

/// First time within the segment where energy rises above
/// `min + frac * (max - min)`.
fn refine_onset(times: &[f32], energy: &[f32], segment: (f32, f32)) -> f32 {
    let (seg_start, seg_end) = segment;
    let window: Vec<(f32, f32)> = times
        .iter()
        .zip(energy)
        .filter(|(&t, _)| t >= seg_start - 0.1 && t <= seg_end + 0.1)
        .map(|(&t, &e)| (t, e))
        .collect();
    if window.is_empty() {
        return seg_start;
    }

    let lo = window.iter().map(|&(_, e)| e).fold(f32::INFINITY, f32::min);
    let hi = window.iter().map(|&(_, e)| e).fold(0.0f32, f32::max);
    let threshold = lo + ONSET_REFINE_FRAC * (hi - lo);
    window
        .iter()
        .find(|&&(_, e)| e >= threshold)
        .map(|&(t, _)| t)
        .unwrap_or(seg_start)
}

/// Write an STFT magnitude spectrogram as CSV (`time_sec` column followed
/// by one dB column per frequency bin). Debug artifact only.
pub fn write_spectrogram_csv(samples: &[f32], sample_rate: u32, path: &Path) -> Result<()> {
    const FRAME: usize = 1024;
    const HOP: usize = 512;

    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FRAME);
    let mut spectrum = fft.make_output_vec();

    let bin_hz = sample_rate as f32 / FRAME as f32;
    write!(file, "time_sec")?;
    for bin in 0..spectrum.len() {
        write!(file, ",{:.0}Hz", bin as f32 * bin_hz)?;
    }
    writeln!(file)?;

    let mut frame_buf = vec![0.0f32; FRAME];
    let mut start = 0;
    while start + FRAME <= samples.len() {
        frame_buf.copy_from_slice(&samples[start..start + FRAME]);
        // Hann window keeps the 19 kHz bin from leaking.
        for (i, x) in frame_buf.iter_mut().enumerate() {
            *x *= 0.5 - 0.5 * (2.0 * PI * i as f32 / FRAME as f32).cos();
        }
        if fft.process(&mut frame_buf, &mut spectrum).is_err() {
            break;
        }

        write!(file, "{:.4}", start as f32 / sample_rate as f32)?;
        for c in &spectrum {
            let db = 10.0 * (c.norm_sqr() + 1e-12).log10();
            write!(file, ",{db:.1}")?;
        }
        writeln!(file)?;
        start += HOP;
    }
    file.flush()?;
    Ok(())
}
