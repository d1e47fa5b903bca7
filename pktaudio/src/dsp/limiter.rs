//! Speaker soft limiter.
//!
//! Linear below the threshold; above it, an asymptotic knee that approaches
//! but never reaches full scale. Keeps loud transients from clipping the
//! tiny speaker amplifier.

/// Limits one sample. `threshold` is the knee position in 0..1.
pub fn soft_limit(sample: i16, threshold: f32) -> i16 {
    let headroom = 1.0 - threshold;
    let x = sample as f32 * (1.0 / 32768.0);
    let abs_x = x.abs();
    if abs_x <= threshold {
        return sample;
    }

    let sign = if x >= 0.0 { 1.0 } else { -1.0 };
    let over = abs_x - threshold;
    let compressed = threshold + headroom * over / (over + headroom);

    (sign * compressed * 32767.0) as i16
}

/// Limits a PCM buffer in place. `threshold = None` disables the limiter.
pub fn apply_limiter(samples: &mut [i16], threshold: Option<f32>) {
    let Some(threshold) = threshold else { return };
    for sample in samples {
        *sample = soft_limit(*sample, threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_is_identity() {
        // 0.5 full scale, threshold 0.6
        let s = (0.5f32 * 32768.0) as i16;
        assert_eq!(soft_limit(s, 0.6), s);
        assert_eq!(soft_limit(-s, 0.6), -s);
        assert_eq!(soft_limit(0, 0.6), 0);
    }

    #[test]
    fn above_threshold_is_compressed_but_monotonic() {
        let t = 0.6f32;
        let a = soft_limit((0.7f32 * 32767.0) as i16, t);
        let b = soft_limit((0.9f32 * 32767.0) as i16, t);
        let c = soft_limit(32767, t);

        assert!(a as f32 / 32767.0 > t);
        assert!(a < b && b < c);
        // Never reaches full scale
        assert!(c < 32767);
    }

    #[test]
    fn limiter_is_symmetric() {
        let t = 0.5;
        for v in [20000i16, 25000, 30000, 32767] {
            assert_eq!(soft_limit(v, t), -soft_limit(-v, t));
        }
    }

    #[test]
    fn disabled_limiter_is_a_no_op() {
        let mut samples = vec![32767i16, -32768];
        apply_limiter(&mut samples, None);
        assert_eq!(samples, [32767, -32768]);
    }
}
