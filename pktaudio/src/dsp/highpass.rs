//! Speaker high-pass filter.
//!
//! 2nd-order Butterworth biquad, Direct Form II Transposed, one state pair
//! per channel. Removes the sub-bass the built-in speaker cannot reproduce
//! anyway; that content only eats amplifier headroom.

use std::f32::consts::PI;

const Q_BUTTERWORTH: f32 = 0.707_106_77;

#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    w1: f32,
    w2: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Coeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

/// Stereo high-pass with change-detected coefficient recomputation.
#[derive(Debug, Default)]
pub struct Highpass {
    coeffs: Coeffs,
    state: [BiquadState; 2],
    /// `(cutoff_hz, sample_rate)` the coefficients were computed for.
    configured: Option<(u32, u32)>,
    enabled: bool,
}

impl Highpass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconfigures the filter. `cutoff_hz = None` disables it. The biquad
    /// coefficients are only recomputed when cutoff or rate actually
    /// changed; filter state resets at that point too.
    pub fn configure(&mut self, cutoff_hz: Option<f32>, sample_rate: u32) {
        let Some(cutoff) = cutoff_hz else {
            self.enabled = false;
            self.configured = None;
            return;
        };

        self.enabled = true;
        let key = (cutoff as u32, sample_rate);
        if self.configured == Some(key) {
            return;
        }

        let omega = 2.0 * PI * cutoff / sample_rate as f32;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * Q_BUTTERWORTH);
        let a0 = 1.0 + alpha;

        self.coeffs = Coeffs {
            b0: ((1.0 + cos_w) / 2.0) / a0,
            b1: (-(1.0 + cos_w)) / a0,
            b2: ((1.0 + cos_w) / 2.0) / a0,
            a1: (-2.0 * cos_w) / a0,
            a2: (1.0 - alpha) / a0,
        };
        self.state = [BiquadState::default(); 2];
        self.configured = Some(key);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Filters an interleaved stereo buffer in place.
    ///
    /// State persists across calls so there is no discontinuity at callback
    /// boundaries.
    pub fn process(&mut self, samples: &mut [i16]) {
        if !self.enabled {
            return;
        }
        let c = self.coeffs;
        for frame in samples.chunks_exact_mut(2) {
            for (channel, sample) in frame.iter_mut().enumerate() {
                let s = &mut self.state[channel];
                let x = *sample as f32;

                let y = c.b0 * x + s.w1;
                s.w1 = c.b1 * x - c.a1 * y + s.w2;
                s.w2 = c.b2 * x - c.a2 * y;

                *sample = y.clamp(-32768.0, 32767.0) as i16;
            }
        }
    }
}
