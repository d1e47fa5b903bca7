//! Perceptual volume curve.

/// Maps a linear volume slider position to a gain factor.
///
/// Power curve with exponent 0.4: 50% slider comes out near 76% gain,
/// which tracks perceived loudness much closer than a straight line.
pub fn volume_curve(linear: f32) -> f32 {
    if linear <= 0.0 {
        return 0.0;
    }
    if linear >= 1.0 {
        return 1.0;
    }
    linear.powf(0.4)
}

/// Scales a PCM buffer by the curved volume.
///
/// Gains within 1% of unity skip the multiply entirely.
pub fn apply_volume(samples: &mut [i16], linear: f32) {
    let gain = volume_curve(linear);
    if (gain - 1.0).abs() <= 0.01 {
        return;
    }
    for sample in samples {
        *sample = (*sample as f32 * gain).clamp(-32768.0, 32767.0) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_endpoints_are_exact() {
        assert_eq!(volume_curve(0.0), 0.0);
        assert_eq!(volume_curve(1.0), 1.0);
        assert_eq!(volume_curve(-0.5), 0.0);
        assert_eq!(volume_curve(2.0), 1.0);
    }

    #[test]
    fn half_slider_boosts_toward_three_quarters() {
        let g = volume_curve(0.5);
        assert!((g - 0.757).abs() < 0.01);
    }

    #[test]
    fn unity_gain_leaves_samples_untouched() {
        let mut samples = vec![1234i16, -4321];
        apply_volume(&mut samples, 1.0);
        assert_eq!(samples, [1234, -4321]);

        // 0.995 also lands inside the unity fast path after the curve.
        let mut samples = vec![1000i16];
        apply_volume(&mut samples, 0.999);
        assert_eq!(samples, [1000]);
    }

    #[test]
    fn muted_output_is_silent() {
        let mut samples = vec![32000i16, -32000];
        apply_volume(&mut samples, 0.0);
        assert_eq!(samples, [0, 0]);
    }
}
