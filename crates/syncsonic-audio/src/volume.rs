//! Volume and balance mapping.

use syncsonic_core::VolumeCurve;

/// Hard ceiling the sound-server accepts per channel, in percent.
const CHANNEL_MAX: u32 = 150;

/// Map linear volume 0..=100 and balance 0..=1 onto per-channel
/// percentages for the sound-server.
///
/// With the balance-weighted curve the louder side keeps the full volume
/// and the other side is attenuated: `left = v * min(1, 2 * (1 - b))`,
/// `right = v * min(1, 2 * b)`. Balance 0.5 leaves both channels at `v`;
/// balance 0 silences the right channel; balance 1 silences the left.
/// The raw curve applies `v` to both channels and ignores balance.
pub fn channel_gains(volume: u8, balance: f32, curve: VolumeCurve) -> (u32, u32) {
    let volume = u32::from(volume.min(100));
    match curve {
        VolumeCurve::Raw => (volume, volume),
        VolumeCurve::BalanceWeighted => {
            let balance = balance.clamp(0.0, 1.0);
            let left = (volume as f32 * (2.0 * (1.0 - balance)).min(1.0)).round() as u32;
            let right = (volume as f32 * (2.0 * balance).min(1.0)).round() as u32;
            (left.min(CHANNEL_MAX), right.min(CHANNEL_MAX))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_balance_keeps_full_volume_on_both_channels() {
        let (left, right) = channel_gains(80, 0.5, VolumeCurve::BalanceWeighted);
        assert_eq!(left, 80);
        assert_eq!(right, 80);
    }

    #[test]
    fn full_left_silences_right() {
        let (left, right) = channel_gains(80, 0.0, VolumeCurve::BalanceWeighted);
        assert_eq!(left, 80);
        assert_eq!(right, 0);
    }

    #[test]
    fn full_right_silences_left() {
        let (left, right) = channel_gains(80, 1.0, VolumeCurve::BalanceWeighted);
        assert_eq!(left, 0);
        assert_eq!(right, 80);
    }

    #[test]
    fn quarter_balance_attenuates_right() {
        let (left, right) = channel_gains(80, 0.25, VolumeCurve::BalanceWeighted);
        assert_eq!(left, 80);
        assert_eq!(right, 40);
    }

    #[test]
    fn raw_curve_ignores_balance() {
        assert_eq!(channel_gains(60, 0.0, VolumeCurve::Raw), (60, 60));
        assert_eq!(channel_gains(60, 1.0, VolumeCurve::Raw), (60, 60));
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let (left, right) = channel_gains(200, 2.0, VolumeCurve::BalanceWeighted);
        assert_eq!(left, 0);
        assert_eq!(right, 100);
    }
}
