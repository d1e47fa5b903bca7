//! Output sink management.
//!
//! The device is owned by a dedicated stream thread (cpal streams are not
//! `Send`), commanded over a channel. The audio callback pulls interleaved
//! stereo i16 frames from a [`SampleSource`] and converts to whatever sample
//! format the device negotiated.
//!
//! Sink selection combines the user's persisted choice with the audio
//! routing configuration: when `.asoundrc` routes through `bluealsa`, the
//! Bluetooth sink wins regardless of the persisted value, and the device
//! runs at 44.1 kHz as A2DP requires.

use std::{sync::Arc, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, warn};

use crate::{AudioError, RATE_BLUETOOTH, RATE_SPEAKER};

/// The output endpoint in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioSink {
    #[default]
    Speaker,
    UsbDac,
    Bluetooth,
}

impl AudioSink {
    /// The rate the device is opened at for this sink.
    pub fn native_rate(self) -> u32 {
        match self {
            AudioSink::Bluetooth => RATE_BLUETOOTH,
            AudioSink::Speaker | AudioSink::UsbDac => RATE_SPEAKER,
        }
    }

    /// The speaker DSP (high-pass, limiter) only runs on the built-in
    /// speaker.
    pub fn wants_speaker_dsp(self) -> bool {
        matches!(self, AudioSink::Speaker)
    }

    /// Resolves the active sink from the persisted selection and the
    /// current audio routing configuration contents.
    pub fn detect(persisted: AudioSink, routing_config: &str) -> AudioSink {
        if routing_config.contains("bluealsa") {
            AudioSink::Bluetooth
        } else {
            persisted
        }
    }
}

/// Never-blocking PCM supplier for the audio callback.
///
/// `fill` must completely fill `out` (zero-padding short data itself) and
/// must not take locks that can be held for long by other threads.
pub trait SampleSource: Send + Sync + 'static {
    fn fill(&self, out: &mut [i16], rate: u32);
}

enum StreamCommand {
    Pause,
    Resume,
    Shutdown,
}

struct ActiveStream {
    sink: AudioSink,
    rate: u32,
    cmd_tx: Sender<StreamCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

enum Backend {
    Cpal(ActiveStream),
    /// Records state without touching hardware; used by tests and headless
    /// runs.
    Null { sink: AudioSink, rate: u32 },
}

pub struct SinkManager {
    source: Arc<dyn SampleSource>,
    backend: Option<Backend>,
    paused: bool,
    null_output: bool,
}

impl SinkManager {
    pub fn new(source: Arc<dyn SampleSource>) -> Self {
        Self {
            source,
            backend: None,
            paused: false,
            null_output: false,
        }
    }

    /// A manager that opens no real device. State transitions behave the
    /// same, nothing is played.
    pub fn new_null(source: Arc<dyn SampleSource>) -> Self {
        Self {
            source,
            backend: None,
            paused: false,
            null_output: true,
        }
    }

    /// Opens the device at the sink's native rate.
    pub fn open(&mut self, sink: AudioSink) -> Result<(), AudioError> {
        self.open_at(sink, sink.native_rate())
    }

    /// Opens the device at an explicit rate (radio reconfigures to the
    /// stream's native rate to skip resampling).
    pub fn open_at(&mut self, sink: AudioSink, rate: u32) -> Result<(), AudioError> {
        self.close();

        if self.null_output {
            debug!(?sink, rate, "null sink opened");
            self.backend = Some(Backend::Null { sink, rate });
            self.paused = false;
            return Ok(());
        }

        let (cmd_tx, cmd_rx) = bounded::<StreamCommand>(4);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let source = self.source.clone();

        let thread = thread::Builder::new()
            .name("audio-sink".into())
            .spawn(move || {
                let stream = match build_stream(source, rate) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if let Err(err) = stream.play() {
                    error!(%err, "failed to start audio stream");
                    return;
                }

                debug!(rate, "audio stream thread running");
                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        StreamCommand::Pause => {
                            if let Err(err) = stream.pause() {
                                warn!(%err, "stream pause failed");
                            }
                        }
                        StreamCommand::Resume => {
                            if let Err(err) = stream.play() {
                                warn!(%err, "stream resume failed");
                            }
                        }
                        StreamCommand::Shutdown => break,
                    }
                }
                debug!("audio stream thread exiting");
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.backend = Some(Backend::Cpal(ActiveStream {
                    sink,
                    rate,
                    cmd_tx,
                    thread: Some(thread),
                }));
                self.paused = false;
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::Stream("stream thread died during open".into()))
            }
        }
    }

    /// Pause/resume is a boolean toggle on the device.
    pub fn set_paused(&mut self, paused: bool) {
        if self.paused == paused {
            return;
        }
        self.paused = paused;
        if let Some(Backend::Cpal(active)) = &self.backend {
            let cmd = if paused {
                StreamCommand::Pause
            } else {
                StreamCommand::Resume
            };
            let _ = active.cmd_tx.send(cmd);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current(&self) -> Option<(AudioSink, u32)> {
        match &self.backend {
            Some(Backend::Cpal(active)) => Some((active.sink, active.rate)),
            Some(Backend::Null { sink, rate }) => Some((*sink, *rate)),
            None => None,
        }
    }

    /// Closes the device and joins the stream thread.
    pub fn close(&mut self) {
        if let Some(Backend::Cpal(mut active)) = self.backend.take() {
            let _ = active.cmd_tx.send(StreamCommand::Shutdown);
            if let Some(thread) = active.thread.take() {
                let _ = thread.join();
            }
        }
        self.backend = None;
    }

    /// Live reconfiguration on a routing change: pause, close, reopen at the
    /// new sink's rate, resume when playback was running.
    ///
    /// When the new sink cannot be opened the speaker rate is tried as a
    /// fallback; if that fails too the device stays closed and the error is
    /// returned.
    pub fn reconfigure(&mut self, sink: AudioSink) -> Result<AudioSink, AudioError> {
        let was_paused = self.paused;
        self.set_paused(true);
        self.close();

        match self.open(sink) {
            Ok(()) => {
                self.set_paused(was_paused);
                Ok(sink)
            }
            Err(err) => {
                warn!(?sink, %err, "sink open failed, falling back to speaker");
                match self.open(AudioSink::Speaker) {
                    Ok(()) => {
                        self.set_paused(was_paused);
                        Ok(AudioSink::Speaker)
                    }
                    Err(fallback_err) => {
                        error!(%fallback_err, "speaker fallback failed, device left closed");
                        Err(fallback_err)
                    }
                }
            }
        }
    }
}

impl Drop for SinkManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builds the cpal output stream at `rate`, matching the device's sample
/// format.
fn build_stream(source: Arc<dyn SampleSource>, rate: u32) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

    debug!(
        device = device.name().unwrap_or_else(|_| "unknown".into()),
        rate,
        "opening output device"
    );

    let default_config = device
        .default_output_config()
        .map_err(|e| AudioError::Stream(e.to_string()))?;
    let sample_format = default_config.sample_format();

    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| error!("audio stream error: {err}");

    let stream = match sample_format {
        cpal::SampleFormat::I16 => {
            let source = source.clone();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        source.fill(data, rate);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::Stream(e.to_string()))?
        }
        cpal::SampleFormat::U16 => {
            let source = source.clone();
            let mut scratch: Vec<i16> = Vec::new();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        source.fill(&mut scratch, rate);
                        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                            *dst = (src as i32 + 32768) as u16;
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::Stream(e.to_string()))?
        }
        cpal::SampleFormat::F32 => {
            let source = source.clone();
            let mut scratch: Vec<i16> = Vec::new();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        source.fill(&mut scratch, rate);
                        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                            *dst = src as f32 / 32768.0;
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::Stream(e.to_string()))?
        }
        other => {
            return Err(AudioError::Stream(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silence;
    impl SampleSource for Silence {
        fn fill(&self, out: &mut [i16], _rate: u32) {
            out.fill(0);
        }
    }

    #[test]
    fn sink_rates_follow_a2dp_constraint() {
        assert_eq!(AudioSink::Bluetooth.native_rate(), 44_100);
        assert_eq!(AudioSink::Speaker.native_rate(), 48_000);
        assert_eq!(AudioSink::UsbDac.native_rate(), 48_000);
    }

    #[test]
    fn bluealsa_routing_wins_over_persisted_choice() {
        let routing = "pcm.!default {\n  type plug\n  slave.pcm \"bluealsa\"\n}\n";
        assert_eq!(
            AudioSink::detect(AudioSink::Speaker, routing),
            AudioSink::Bluetooth
        );
        assert_eq!(
            AudioSink::detect(AudioSink::UsbDac, ""),
            AudioSink::UsbDac
        );
    }

    #[test]
    fn speaker_dsp_only_on_speaker() {
        assert!(AudioSink::Speaker.wants_speaker_dsp());
        assert!(!AudioSink::UsbDac.wants_speaker_dsp());
        assert!(!AudioSink::Bluetooth.wants_speaker_dsp());
    }

    #[test]
    fn null_sink_tracks_state_transitions() {
        let mut manager = SinkManager::new_null(Arc::new(Silence));
        assert!(manager.current().is_none());

        manager.open(AudioSink::Speaker).unwrap();
        assert_eq!(manager.current(), Some((AudioSink::Speaker, 48_000)));

        manager.set_paused(true);
        assert!(manager.is_paused());

        let landed = manager.reconfigure(AudioSink::Bluetooth).unwrap();
        assert_eq!(landed, AudioSink::Bluetooth);
        assert_eq!(manager.current(), Some((AudioSink::Bluetooth, 44_100)));
        assert!(manager.is_paused());

        manager.close();
        assert!(manager.current().is_none());
    }
}
