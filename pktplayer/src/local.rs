//! The local-file decode session: one producer thread pulling PCM out of a
//! [`StreamDecoder`], through the resampler, into the shared ring buffer.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};

use pktaudio::{Resampler, RingBuffer};
use pktdecode::StreamDecoder;
use tracing::{debug, error, info};

use crate::callback::CallbackState;

/// Frames decoded per producer iteration.
const DECODE_CHUNK_FRAMES: usize = 2048;

/// Producer pacing sleep when the ring is above half full.
const PACING_SLEEP: Duration = Duration::from_millis(5);

/// Shared control block between the player and the decode thread.
pub struct DecodeControl {
    pub should_stop: AtomicBool,
    /// Pending seek target in milliseconds.
    pub pending_seek: Mutex<Option<u64>>,
    pub repeat: AtomicBool,
    /// Set once the decoder hit EOF and the ring fully drained.
    pub finished: AtomicBool,
    /// Device rate to resample to; swapped on sink reconfiguration.
    pub dest_rate: AtomicU64,
}

pub struct LocalSession {
    pub path: PathBuf,
    pub source_rate: u32,
    pub duration_ms: u64,
    pub control: Arc<DecodeControl>,
    thread: Option<thread::JoinHandle<()>>,
}

impl LocalSession {
    /// Opens the decoder and starts the producer thread.
    pub fn start(
        path: PathBuf,
        mut decoder: StreamDecoder,
        ring: Arc<RingBuffer>,
        callback: Arc<CallbackState>,
        dest_rate: u32,
        repeat: bool,
    ) -> Result<Self, pktaudio::AudioError> {
        let info = decoder.info();
        let control = Arc::new(DecodeControl {
            should_stop: AtomicBool::new(false),
            pending_seek: Mutex::new(None),
            repeat: AtomicBool::new(repeat),
            finished: AtomicBool::new(false),
            dest_rate: AtomicU64::new(dest_rate as u64),
        });

        let thread_control = control.clone();
        let thread = thread::Builder::new()
            .name("decode".into())
            .spawn(move || {
                decode_loop(&mut decoder, &ring, &callback, &thread_control, dest_rate);
            })
            .map_err(|e| pktaudio::AudioError::Stream(e.to_string()))?;

        Ok(Self {
            path,
            source_rate: info.sample_rate,
            duration_ms: info.duration_ms(),
            control,
            thread: Some(thread),
        })
    }

    /// Queues a seek; the decode thread performs it and clears ring and
    /// resampler before producing new frames.
    pub fn seek(&self, position_ms: u64) {
        *self
            .control
            .pending_seek
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(position_ms);
    }

    pub fn set_repeat(&self, repeat: bool) {
        self.control.repeat.store(repeat, Ordering::Relaxed);
    }

    /// Requests a resample-target change (sink rate switched mid-track).
    pub fn set_dest_rate(&self, rate: u32) {
        self.control.dest_rate.store(rate as u64, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.control.finished.load(Ordering::Relaxed)
    }

    /// Stops the producer and joins it.
    pub fn stop(mut self) {
        self.control.should_stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("decode thread panicked");
            }
        }
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        self.control.should_stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn decode_loop(
    decoder: &mut StreamDecoder,
    ring: &RingBuffer,
    callback: &CallbackState,
    control: &DecodeControl,
    initial_dest_rate: u32,
) {
    let info = decoder.info();
    let source_rate = info.sample_rate.max(1);
    let mut dest_rate = initial_dest_rate;
    let mut resampler = match Resampler::new(source_rate, dest_rate) {
        Ok(resampler) => resampler,
        Err(err) => {
            error!(%err, "resampler init failed");
            control.finished.store(true, Ordering::Relaxed);
            return;
        }
    };

    info!(
        format = ?info.format,
        source_rate,
        dest_rate,
        total_frames = info.total_frames,
        "decode thread started"
    );

    let mut pcm = vec![0i16; DECODE_CHUNK_FRAMES * 2];

    loop {
        if control.should_stop.load(Ordering::Relaxed) {
            return;
        }

        // Sink rate changed under us: rebuild the converter, drop whatever
        // was in flight (the audible glitch stays bounded by the ring).
        let wanted_rate = control.dest_rate.load(Ordering::Relaxed) as u32;
        if wanted_rate != dest_rate {
            let position_ms = callback.consumed_frames() * 1000 / dest_rate.max(1) as u64;
            dest_rate = wanted_rate;
            match Resampler::new(source_rate, dest_rate) {
                Ok(new) => resampler = new,
                Err(err) => {
                    error!(%err, "resampler rebuild failed");
                    control.finished.store(true, Ordering::Relaxed);
                    return;
                }
            }
            ring.clear();
            callback.set_consumed_frames(position_ms * dest_rate as u64 / 1000);
            debug!(dest_rate, "resampler retargeted");
        }

        // Seeks are acknowledged here: codec seek, then ring and resampler
        // state go away before any new frame is produced.
        let pending = control
            .pending_seek
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(seek_ms) = pending {
            let frame = seek_ms * source_rate as u64 / 1000;
            if let Err(err) = decoder.seek(frame) {
                error!(%err, seek_ms, "seek failed");
            } else {
                ring.clear();
                if resampler.reset().is_err() {
                    control.finished.store(true, Ordering::Relaxed);
                    return;
                }
                callback.set_consumed_frames(decoder.position() * dest_rate as u64 / source_rate as u64);
                debug!(seek_ms, "seek applied");
            }
        }

        // Pace production once the ring is comfortably ahead.
        if ring.fill_level() > 0.5 {
            thread::sleep(PACING_SLEEP);
            continue;
        }

        let frames = match decoder.read(&mut pcm) {
            Ok(frames) => frames,
            Err(err) => {
                // Per the propagation policy a decode error mid-stream is
                // an early EOF, not a crash.
                error!(%err, "decode error, treating as end of stream");
                0
            }
        };

        if frames == 0 {
            if !decoder.is_eof() {
                continue;
            }
            // Flush the converter tail, then wait for the ring to drain.
            if let Ok(tail) = resampler.process(&[], true) {
                write_all(ring, &tail, control);
            }
            if !wait_for_drain(ring, control) {
                continue; // a seek or stop arrived while draining
            }
            if control.repeat.load(Ordering::Relaxed) {
                info!("repeat: seeking to zero");
                if decoder.seek(0).is_ok() && resampler.reset().is_ok() {
                    ring.clear();
                    callback.set_consumed_frames(0);
                    continue;
                }
            }
            control.finished.store(true, Ordering::Relaxed);
            info!("playback finished");
            return;
        }

        match resampler.process(&pcm[..frames * 2], false) {
            Ok(out) => write_all(ring, &out, control),
            Err(err) => {
                error!(%err, "resample failed");
                control.finished.store(true, Ordering::Relaxed);
                return;
            }
        }
    }
}

/// Writes a whole buffer into the ring, sleeping while it is full.
fn write_all(ring: &RingBuffer, samples: &[i16], control: &DecodeControl) {
    let mut written = 0usize;
    let total = samples.len() / 2;
    while written < total {
        if control.should_stop.load(Ordering::Relaxed) {
            return;
        }
        let n = ring.write(&samples[written * 2..]);
        if n == 0 {
            thread::sleep(PACING_SLEEP);
            continue;
        }
        written += n;
    }
}

/// Waits for the ring to empty. Returns false when interrupted by stop or a
/// queued seek.
fn wait_for_drain(ring: &RingBuffer, control: &DecodeControl) -> bool {
    loop {
        if control.should_stop.load(Ordering::Relaxed) {
            return false;
        }
        if control
            .pending_seek
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
        {
            return false;
        }
        if ring.is_empty() {
            return true;
        }
        thread::sleep(PACING_SLEEP);
    }
}
