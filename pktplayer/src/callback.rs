//! The audio-callback side of the player.
//!
//! [`CallbackState`] is the [`SampleSource`] handed to the sink manager. It
//! never blocks: the ring read is a try-lock, the DSP state a try-lock, and
//! on any contention the period degrades to silence or skips the filter
//! pass rather than stalling the device.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Mutex,
};

use pktaudio::{
    dsp::{apply_limiter, apply_volume, Highpass},
    RingBuffer, SampleSource,
};
use pktconfig::Settings;
use std::sync::Arc;

/// DSP state mutated by the control side, read by the callback.
struct DspChain {
    highpass: Highpass,
    limiter_threshold: Option<f32>,
    /// High-pass and limiter only run on the built-in speaker.
    speaker: bool,
}

pub struct CallbackState {
    ring: Arc<RingBuffer>,
    /// Linear volume 0..1, stored as f32 bits.
    volume_bits: AtomicU32,
    /// Frames consumed by the device since the session started (device
    /// rate); authoritative for the reported position.
    consumed_frames: AtomicU64,
    /// Producing silence while no session is active.
    active: AtomicBool,
    dsp: Mutex<DspChain>,
}

impl CallbackState {
    pub fn new(ring: Arc<RingBuffer>) -> Self {
        Self {
            ring,
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            consumed_frames: AtomicU64::new(0),
            active: AtomicBool::new(false),
            dsp: Mutex::new(DspChain {
                highpass: Highpass::new(),
                limiter_threshold: None,
                speaker: true,
            }),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn set_volume(&self, linear: f32) {
        self.volume_bits
            .store(linear.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn consumed_frames(&self) -> u64 {
        self.consumed_frames.load(Ordering::Relaxed)
    }

    pub fn set_consumed_frames(&self, frames: u64) {
        self.consumed_frames.store(frames, Ordering::Relaxed);
    }

    /// Applies the speaker DSP settings for the given sink and device rate.
    /// Coefficients recompute only when the bass-filter value or rate
    /// actually changed.
    pub fn configure_dsp(&self, settings: &Settings, speaker: bool, rate: u32) {
        let mut dsp = match self.dsp.lock() {
            Ok(dsp) => dsp,
            Err(poisoned) => poisoned.into_inner(),
        };
        dsp.speaker = speaker;
        dsp.highpass.configure(settings.bass_filter.cutoff_hz(), rate);
        dsp.limiter_threshold = settings.soft_limiter.threshold();
    }
}

impl SampleSource for CallbackState {
    fn fill(&self, out: &mut [i16], _rate: u32) {
        if !self.active.load(Ordering::Relaxed) {
            out.fill(0);
            return;
        }

        // Short reads leave a zero-padded tail; the callback never waits
        // for the producer.
        let frames = self.ring.try_read(out);
        self.consumed_frames
            .fetch_add(frames as u64, Ordering::Relaxed);

        apply_volume(out, self.volume());

        // The DSP lock is only ever held briefly by configure_dsp; if that
        // races this period, skipping the filters for ~40 ms is inaudible
        // next to blocking the device.
        if let Ok(mut dsp) = self.dsp.try_lock() {
            if dsp.speaker {
                dsp.highpass.process(out);
                apply_limiter(out, dsp.limiter_threshold);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_callback_outputs_silence() {
        let ring = Arc::new(RingBuffer::new(64));
        ring.write(&[1000i16; 32]);

        let state = CallbackState::new(ring);
        let mut out = [7i16; 16];
        state.fill(&mut out, 48_000);
        assert_eq!(out, [0i16; 16]);
        assert_eq!(state.consumed_frames(), 0);
    }

    #[test]
    fn active_callback_drains_ring_and_counts_frames() {
        let ring = Arc::new(RingBuffer::new(64));
        ring.write(&[500i16; 8]);

        let state = CallbackState::new(ring);
        state.set_active(true);

        let mut out = [0i16; 16];
        state.fill(&mut out, 48_000);
        // 4 frames of data, the rest zero-padded.
        assert_eq!(&out[..8], &[500i16; 8]);
        assert_eq!(&out[8..], &[0i16; 8]);
        assert_eq!(state.consumed_frames(), 4);
    }

    #[test]
    fn volume_scales_output() {
        let ring = Arc::new(RingBuffer::new(64));
        ring.write(&[10000i16; 4]);

        let state = CallbackState::new(ring);
        state.set_active(true);
        state.set_volume(0.5);

        let mut out = [0i16; 4];
        state.fill(&mut out, 48_000);
        // Curved 0.5 ≈ 0.757 gain.
        assert!(out[0] < 10000 && out[0] > 6000);
    }

    #[test]
    fn limiter_only_applies_on_speaker() {
        let settings = Settings::default(); // limiter defaults to Medium

        let ring = Arc::new(RingBuffer::new(64));
        ring.write(&[32000i16; 4]);
        let state = CallbackState::new(ring.clone());
        state.set_active(true);
        state.configure_dsp(&settings, false, 48_000);

        let mut out = [0i16; 4];
        state.fill(&mut out, 48_000);
        assert_eq!(out[0], 32000, "non-speaker sink must bypass the limiter");

        ring.write(&[32000i16; 4]);
        let settings_speaker = Settings {
            bass_filter: pktconfig::BassFilter::Off,
            ..settings
        };
        state.configure_dsp(&settings_speaker, true, 48_000);
        state.fill(&mut out, 48_000);
        assert!(out[0] < 32000, "speaker sink must limit hot samples");
    }
}
