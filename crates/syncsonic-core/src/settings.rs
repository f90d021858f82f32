//! Per-speaker audio settings.

use serde::{Deserialize, Serialize};

/// Loopback latency applied when the phone supplies none.
pub const DEFAULT_LATENCY_MS: u32 = 100;

/// Audio settings applied to one speaker's loopback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeakerSettings {
    /// Linear volume, 0..=100.
    pub volume: u8,
    /// Stereo balance, 0.0 (full left) ..= 1.0 (full right).
    pub balance: f32,
    /// Playback-buffer target in milliseconds, 0..=500.
    pub latency_ms: u32,
    /// Mute flag; independent from volume so unmute restores the level.
    pub muted: bool,
}

impl Default for SpeakerSettings {
    fn default() -> Self {
        Self {
            volume: 50,
            balance: 0.5,
            latency_ms: DEFAULT_LATENCY_MS,
            muted: false,
        }
    }
}

impl SpeakerSettings {
    /// Clamp every field into its documented range.
    pub fn clamped(mut self) -> Self {
        self.volume = self.volume.min(100);
        self.balance = self.balance.clamp(0.0, 1.0);
        self.latency_ms = self.latency_ms.min(500);
        self
    }
}

/// Partial settings update; unset fields keep their previous value.
///
/// Patches are idempotent and last-write-wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub volume: Option<u8>,
    pub balance: Option<f32>,
    pub latency_ms: Option<u32>,
    pub muted: Option<bool>,
}

impl SettingsPatch {
    /// Apply this patch on top of existing settings.
    pub fn apply(self, base: SpeakerSettings) -> SpeakerSettings {
        SpeakerSettings {
            volume: self.volume.unwrap_or(base.volume),
            balance: self.balance.unwrap_or(base.balance),
            latency_ms: self.latency_ms.unwrap_or(base.latency_ms),
            muted: self.muted.unwrap_or(base.muted),
        }
        .clamped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_values() {
        let settings = SpeakerSettings {
            volume: 180,
            balance: 1.7,
            latency_ms: 4000,
            muted: false,
        }
        .clamped();
        assert_eq!(settings.volume, 100);
        assert_eq!(settings.balance, 1.0);
        assert_eq!(settings.latency_ms, 500);
    }

    #[test]
    fn patch_keeps_unset_fields() {
        let base = SpeakerSettings {
            volume: 60,
            balance: 0.25,
            latency_ms: 120,
            muted: false,
        };
        let patched = SettingsPatch {
            muted: Some(true),
            ..Default::default()
        }
        .apply(base);
        assert_eq!(patched.volume, 60);
        assert_eq!(patched.balance, 0.25);
        assert_eq!(patched.latency_ms, 120);
        assert!(patched.muted);
    }

    #[test]
    fn patch_is_idempotent() {
        let base = SpeakerSettings::default();
        let patch = SettingsPatch {
            volume: Some(80),
            balance: Some(0.75),
            latency_ms: Some(250),
            muted: Some(false),
        };
        let once = patch.apply(base);
        let twice = patch.apply(once);
        assert_eq!(once, twice);
    }
}
