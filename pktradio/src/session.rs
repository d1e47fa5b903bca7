//! The live radio session: producer task, codec framing, state machine.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use bytes::Bytes;
use futures_util::StreamExt;
use minimp3::{Decoder as MiniMp3Decoder, Error as MiniMp3Error};
use pktaudio::RingBuffer;
use pktdecode::{common::ChannelReader, format_from_content_type, AacStreamDecoder, AudioFormat};
use pktmeta::icy::IcyTitle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{IcyDemux, RadioState};

/// Ring occupancy (seconds of audio) below which PLAYING drops back to
/// BUFFERING, and at which BUFFERING promotes to PLAYING. The spread stops
/// the state from thrashing around a single threshold.
const BUFFER_LOW_SECS: u64 = 2;
const BUFFER_HIGH_SECS: u64 = 6;

/// How long `stop` waits for the producer before abandoning it.
const STOP_BUDGET: Duration = Duration::from_secs(5);

/// Pacing sleep while the ring has no room.
const RING_FULL_BACKOFF: Duration = Duration::from_millis(5);

/// Events the host reacts to.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// Now-playing metadata changed; triggers cover/lyrics fetches.
    Metadata(IcyTitle),
    /// First frame decoded: the stream's native rate is known, reopen the
    /// sink at this rate and resume the device.
    Format { sample_rate: u32 },
}

/// Snapshot handed to the UI.
#[derive(Debug, Clone, Default)]
pub struct RadioStatus {
    pub state: RadioState,
    pub station_name: String,
    pub bitrate_kbps: u32,
    pub content_type: String,
    pub artist: Option<String>,
    pub title: Option<String>,
    /// Ring occupancy, 0.0 to 1.0.
    pub buffer_level: f32,
}

#[derive(Debug, Default)]
struct MetaFields {
    station_name: String,
    bitrate_kbps: u32,
    content_type: String,
    artist: Option<String>,
    title: Option<String>,
}

struct Shared {
    state: Mutex<RadioState>,
    meta: Mutex<MetaFields>,
    sample_rate: AtomicU32,
    should_stop: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: RadioState) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != state {
            debug!(?state, "radio state change");
            *guard = state;
        }
    }

    fn state(&self) -> RadioState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        error!(%message, "radio session failed");
        self.set_state(RadioState::Error(message));
    }
}

/// A running Icecast/Shoutcast session.
///
/// Exactly one of radio and local playback is active at a time; the owner
/// enforces that by stopping one before starting the other.
pub struct RadioSession {
    shared: Arc<Shared>,
    ring: Arc<RingBuffer>,
    cancel: CancellationToken,
    producer: Option<tokio::task::JoinHandle<()>>,
    url: String,
}

impl RadioSession {
    /// Connects and starts producing into `ring`. Returns immediately; all
    /// progress is visible through [`RadioSession::status`] and `events`.
    pub fn start(
        client: pktnet::Client,
        url: String,
        ring: Arc<RingBuffer>,
        events: mpsc::UnboundedSender<RadioEvent>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(RadioState::Connecting),
            meta: Mutex::new(MetaFields::default()),
            sample_rate: AtomicU32::new(0),
            should_stop: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();

        let producer = tokio::spawn(producer_loop(
            client,
            url.clone(),
            ring.clone(),
            shared.clone(),
            cancel.clone(),
            events,
        ));

        Self {
            shared,
            ring,
            cancel,
            producer: Some(producer),
            url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> RadioState {
        self.shared.state()
    }

    pub fn status(&self) -> RadioStatus {
        let meta = self
            .shared
            .meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        RadioStatus {
            state: self.shared.state(),
            station_name: meta.station_name.clone(),
            bitrate_kbps: meta.bitrate_kbps,
            content_type: meta.content_type.clone(),
            artist: meta.artist.clone(),
            title: meta.title.clone(),
            buffer_level: self.ring.fill_level(),
        }
    }

    /// Decoded sample rate, 0 before the first frame.
    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate.load(Ordering::Relaxed)
    }

    /// Stops the session: signals every worker, waits a bounded time for
    /// the producer, clears the ring.
    pub async fn stop(mut self) {
        info!(url = %self.url, "stopping radio session");
        self.shared.should_stop.store(true, Ordering::Relaxed);
        self.cancel.cancel();

        if let Some(producer) = self.producer.take() {
            if tokio::time::timeout(STOP_BUDGET, producer).await.is_err() {
                warn!("radio producer did not stop within budget");
            }
        }
        self.ring.clear();
        self.shared.set_state(RadioState::Stopped);
    }
}

async fn producer_loop(
    client: pktnet::Client,
    url: String,
    ring: Arc<RingBuffer>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<RadioEvent>,
) {
    info!(%url, "radio connecting");

    let response = tokio::select! {
        _ = cancel.cancelled() => return,
        response = client.get_streaming(&url, &[("Icy-MetaData", "1")]) => match response {
            Ok(response) => response,
            Err(err) => {
                shared.fail(err.to_string());
                return;
            }
        },
    };

    let metaint = header_usize(&response, "icy-metaint");
    let format = {
        let mut meta = shared.meta.lock().unwrap_or_else(PoisonError::into_inner);
        meta.bitrate_kbps = header_usize(&response, "icy-br") as u32;
        meta.station_name = header_str(&response, "icy-name");
        meta.content_type = header_str(&response, "content-type");
        format_from_content_type(&meta.content_type)
    };

    info!(metaint, ?format, "radio stream headers parsed");
    shared.set_state(RadioState::Buffering);

    // Audio bytes flow to a blocking decode task; this task owns the
    // network side and the ICY demux.
    let (audio_tx, audio_rx) = mpsc::channel::<Result<Bytes, String>>(32);
    let decode_handle = spawn_decoder(format, audio_rx, ring, shared.clone(), events.clone());

    let mut demux = IcyDemux::new(metaint);
    let mut body = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(chunk)) => {
                let mut audio = Vec::with_capacity(chunk.len());
                for title in demux.push(&chunk, &mut audio) {
                    apply_title(&shared, &events, title);
                }
                if !audio.is_empty() && audio_tx.send(Ok(Bytes::from(audio))).await.is_err() {
                    break; // decoder died; its error is already published
                }
            }
            Some(Err(err)) => {
                let _ = audio_tx.send(Err(err.to_string())).await;
                if !shared.should_stop.load(Ordering::Relaxed) {
                    shared.fail(format!("stream read failed: {err}"));
                }
                break;
            }
            None => {
                debug!("radio stream ended");
                break;
            }
        }
    }

    drop(audio_tx);
    let _ = decode_handle.await;

    if !matches!(shared.state(), RadioState::Error(_)) {
        shared.set_state(RadioState::Stopped);
    }
}

fn apply_title(
    shared: &Shared,
    events: &mpsc::UnboundedSender<RadioEvent>,
    title: IcyTitle,
) {
    let changed = {
        let mut meta = shared.meta.lock().unwrap_or_else(PoisonError::into_inner);
        let changed =
            meta.artist != title.artist || meta.title.as_deref() != Some(title.title.as_str());
        if changed {
            meta.artist = title.artist.clone();
            meta.title = Some(title.title.clone());
        }
        changed
    };
    if changed {
        info!(artist = ?title.artist, title = %title.title, "now playing");
        let _ = events.send(RadioEvent::Metadata(title));
    }
}

fn spawn_decoder(
    format: AudioFormat,
    audio_rx: mpsc::Receiver<Result<Bytes, String>>,
    ring: Arc<RingBuffer>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || match format {
        AudioFormat::Aac => aac_decode_loop(audio_rx, &ring, &shared, &events),
        _ => mp3_decode_loop(audio_rx, &ring, &shared, &events),
    })
}

fn mp3_decode_loop(
    audio_rx: mpsc::Receiver<Result<Bytes, String>>,
    ring: &RingBuffer,
    shared: &Shared,
    events: &mpsc::UnboundedSender<RadioEvent>,
) {
    let mut decoder = MiniMp3Decoder::new(ChannelReader::new(audio_rx));
    let mut announced = false;

    loop {
        if shared.should_stop.load(Ordering::Relaxed) {
            return;
        }
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 0 {
                    continue;
                }
                let rate = frame.sample_rate as u32;
                if !announced {
                    announced = true;
                    shared.sample_rate.store(rate, Ordering::Relaxed);
                    let _ = events.send(RadioEvent::Format { sample_rate: rate });
                }
                push_pcm(&frame.data, frame.channels, rate, ring, shared);
            }
            Err(MiniMp3Error::Eof) => return,
            Err(MiniMp3Error::InsufficientData) | Err(MiniMp3Error::SkippedData) => continue,
            Err(MiniMp3Error::Io(err)) => {
                if !shared.should_stop.load(Ordering::Relaxed) {
                    shared.fail(format!("MP3 stream decode failed: {err}"));
                }
                return;
            }
        }
    }
}

fn aac_decode_loop(
    mut audio_rx: mpsc::Receiver<Result<Bytes, String>>,
    ring: &RingBuffer,
    shared: &Shared,
    events: &mpsc::UnboundedSender<RadioEvent>,
) {
    let mut aac = AacStreamDecoder::new();
    let mut announced = false;

    while let Some(chunk) = audio_rx.blocking_recv() {
        if shared.should_stop.load(Ordering::Relaxed) {
            return;
        }
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                if !shared.should_stop.load(Ordering::Relaxed) {
                    shared.fail(format!("AAC stream read failed: {err}"));
                }
                return;
            }
        };

        let result = aac.push(&chunk, |pcm, channels, rate| {
            if !announced && rate > 0 {
                announced = true;
                shared.sample_rate.store(rate, Ordering::Relaxed);
                let _ = events.send(RadioEvent::Format { sample_rate: rate });
            }
            push_pcm(pcm, channels as usize, rate, ring, shared);
        });
        if let Err(err) = result {
            // ADTS resyncs on the next sync word; log and keep going.
            warn!(%err, "AAC push failed, resynchronising");
            aac.reset();
        }
    }
}

/// Upmixes to stereo, writes into the ring (pacing when full), and applies
/// the buffering hysteresis.
fn push_pcm(pcm: &[i16], channels: usize, rate: u32, ring: &RingBuffer, shared: &Shared) {
    let stereo: Vec<i16> = match channels {
        1 => pcm.iter().flat_map(|&s| [s, s]).collect(),
        2 => pcm.to_vec(),
        n => pcm
            .chunks(n)
            .flat_map(|f| [f[0], *f.get(1).unwrap_or(&f[0])])
            .collect(),
    };

    let mut written = 0usize;
    while written < stereo.len() / 2 {
        if shared.should_stop.load(Ordering::Relaxed) {
            return;
        }
        let n = ring.write(&stereo[written * 2..]);
        if n == 0 {
            std::thread::sleep(RING_FULL_BACKOFF);
            continue;
        }
        written += n;
    }

    update_buffering(ring, shared, rate);
}

fn update_buffering(ring: &RingBuffer, shared: &Shared, rate: u32) {
    if rate == 0 {
        return;
    }
    let len = ring.len() as u64;
    let low = rate as u64 * BUFFER_LOW_SECS;
    let high = rate as u64 * BUFFER_HIGH_SECS;

    match shared.state() {
        RadioState::Playing if len < low => shared.set_state(RadioState::Buffering),
        RadioState::Buffering if len >= high => shared.set_state(RadioState::Playing),
        _ => {}
    }
}

fn header_str(response: &reqwest::Response, name: &str) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn header_usize(response: &reqwest::Response, name: &str) -> usize {
    header_str(response, name).parse().unwrap_or(0)
}
