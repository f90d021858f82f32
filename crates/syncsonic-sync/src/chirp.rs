//! Ultrasonic chirp generation.

use std::f32::consts::PI;
use std::path::Path;

use crate::error::Result;

/// Burst tone frequency. High enough to be inaudible, low enough for the
/// speakers and the USB microphone to reproduce.
pub const BURST_FREQ_HZ: f32 = 19_000.0;

/// Burst length in seconds.
pub const BURST_DURATION_SEC: f32 = 0.2;

/// Sample rate shared by playback and capture.
pub const SAMPLE_RATE: u32 = 48_000;

/// Fade-in/out length to avoid clicks at the burst edges.
const FADE_SEC: f32 = 0.01;

/// Peak amplitude relative to full scale.
const AMPLITUDE: f32 = 0.8;

/// Write one mono 16-bit chirp WAV to `path`.
pub fn write_chirp_wav(path: &Path) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    let total = (SAMPLE_RATE as f32 * BURST_DURATION_SEC) as usize;
    let fade = (SAMPLE_RATE as f32 * FADE_SEC) as usize;
    for i in 0..total {
        let t = i as f32 / SAMPLE_RATE as f32;
        let mut x = (2.0 * PI * BURST_FREQ_HZ * t).sin() * AMPLITUDE;
        if i < fade {
            x *= i as f32 / fade as f32;
        } else if i >= total - fade {
            x *= (total - 1 - i) as f32 / fade as f32;
        }
        writer.write_sample((x * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Load a mono (or downmixed stereo) WAV as float samples in [-1, 1].
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let mut samples = Vec::with_capacity(reader.len() as usize / channels.max(1));
    match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            let mut frame = Vec::with_capacity(channels);
            for sample in reader.samples::<i32>() {
                frame.push(sample? as f32 * scale);
                if frame.len() == channels {
                    samples.push(frame.iter().sum::<f32>() / channels as f32);
                    frame.clear();
                }
            }
        }
        hound::SampleFormat::Float => {
            let mut frame = Vec::with_capacity(channels);
            for sample in reader.samples::<f32>() {
                frame.push(sample?);
                if frame.len() == channels {
                    samples.push(frame.iter().sum::<f32>() / channels as f32);
                    frame.clear();
                }
            }
        }
    }
    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chirp_wav_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chirp.wav");
        write_chirp_wav(&path).unwrap();

        let (samples, rate) = read_wav_mono(&path).unwrap();
        assert_eq!(rate, SAMPLE_RATE);
        assert_eq!(
            samples.len(),
            (SAMPLE_RATE as f32 * BURST_DURATION_SEC) as usize
        );
        // Fades keep the edges quiet and the middle loud.
        assert!(samples[0].abs() < 0.01);
        assert!(samples[samples.len() - 1].abs() < 0.01);
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.7 && peak <= 0.81);
    }
}
