//! # pktaudio
//!
//! The PCM side of the player: the ring buffer between producers and the
//! audio callback, the sample-rate converter, the speaker DSP chain and the
//! output sink management (built-in speaker, USB DAC, Bluetooth A2DP).
//!
//! Everything here deals in interleaved signed 16-bit stereo frames.

pub mod dsp;
mod resample;
mod ring;
mod sink;
mod watch;

pub use resample::Resampler;
pub use ring::RingBuffer;
pub use sink::{AudioSink, SampleSource, SinkManager};
pub use watch::{RoutingWatcher, ROUTING_FILE};

/// Sink-native sample rates. Bluetooth A2DP links run at 44.1 kHz, the
/// speaker and USB DAC paths at 48 kHz.
pub const RATE_BLUETOOTH: u32 = 44_100;
pub const RATE_SPEAKER: u32 = 48_000;

/// Default ring capacity: ten seconds of stereo audio at 48 kHz.
pub const DEFAULT_RING_FRAMES: usize = RATE_SPEAKER as usize * 10;

/// Errors raised by the audio plumbing.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("resampler error: {0}")]
    Resampler(String),
    #[error("routing watcher error: {0}")]
    Watcher(String),
}
