//! The HLS playback session.
//!
//! One producer task drives the whole session: it keeps the playlist
//! fresh, consumes segments in media-sequence order, runs the one-shot
//! prefetch worker for the next segment, demuxes MPEG-TS where needed and
//! hands elementary-stream bytes to a blocking decode task that feeds the
//! ring buffer.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use bytes::Bytes;
use minimp3::{Decoder as MiniMp3Decoder, Error as MiniMp3Error};
use pktaudio::RingBuffer;
use pktdecode::{adts, common::ChannelReader, AacStreamDecoder};
use pktmeta::split_artist_title;
use pktnet::Client;
use pktradio::{RadioEvent, RadioState};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    playlist::{fetch_playlist, HlsPlaylist},
    ts::TsDemuxer,
    HlsError,
};

const BUFFER_LOW_SECS: u64 = 2;
const BUFFER_HIGH_SECS: u64 = 6;
const STOP_BUDGET: Duration = Duration::from_secs(5);
const RING_FULL_BACKOFF: Duration = Duration::from_millis(5);

/// Per-segment fetch retry backoff schedule.
const FETCH_BACKOFF_MS: [u64; 3] = [100, 200, 300];

/// Snapshot for the UI.
#[derive(Debug, Clone, Default)]
pub struct HlsStatus {
    pub state: RadioState,
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Estimated stream bitrate from the last consumed segment.
    pub bitrate_kbps: u32,
    pub buffer_level: f32,
    /// Media sequence of the last fully consumed segment.
    pub last_played_sequence: u64,
}

#[derive(Debug, Default)]
struct MetaFields {
    title: Option<String>,
    artist: Option<String>,
    bitrate_kbps: u32,
    last_played_sequence: u64,
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
            debug!(?state, "HLS state change");
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
        error!(%message, "HLS session failed");
        self.set_state(RadioState::Error(message));
    }
}

/// Feed into the blocking decode task.
enum Feed {
    Chunk(Bytes),
    /// Segment boundary: flush codec transport state so segments cannot
    /// splice into each other.
    Flush,
}

/// A running HLS session. Mutually exclusive with local playback and direct
/// radio, enforced by the owner.
pub struct HlsSession {
    shared: Arc<Shared>,
    ring: Arc<RingBuffer>,
    cancel: CancellationToken,
    producer: Option<tokio::task::JoinHandle<()>>,
    url: String,
}

impl HlsSession {
    pub fn start(
        client: Client,
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

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> HlsStatus {
        let meta = self
            .shared
            .meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        HlsStatus {
            state: self.shared.state(),
            title: meta.title.clone(),
            artist: meta.artist.clone(),
            bitrate_kbps: meta.bitrate_kbps,
            buffer_level: self.ring.fill_level(),
            last_played_sequence: meta.last_played_sequence,
        }
    }

    /// Stops the session; the producer joins its prefetch worker before it
    /// exits, so no fetch outlives the session.
    pub async fn stop(mut self) {
        info!(url = %self.url, "stopping HLS session");
        self.shared.should_stop.store(true, Ordering::Relaxed);
        self.cancel.cancel();

        if let Some(producer) = self.producer.take() {
            if tokio::time::timeout(STOP_BUDGET, producer).await.is_err() {
                warn!("HLS producer did not stop within budget");
            }
        }
        self.ring.clear();
        self.shared.set_state(RadioState::Stopped);
    }
}

/// One-shot prefetch of the next segment.
struct Prefetch {
    index: usize,
    handle: tokio::task::JoinHandle<Option<Bytes>>,
}

async fn producer_loop(
    client: Client,
    url: String,
    ring: Arc<RingBuffer>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<RadioEvent>,
) {
    info!(%url, "HLS connecting");

    let mut playlist = tokio::select! {
        _ = cancel.cancelled() => return,
        result = fetch_playlist(&client, &url) => match result {
            Ok(playlist) => playlist,
            Err(err) => {
                shared.fail(err.to_string());
                return;
            }
        },
    };

    if playlist.segments.is_empty() {
        shared.fail("playlist has no segments");
        return;
    }

    shared.set_state(RadioState::Buffering);

    let (feed_tx, feed_rx) = mpsc::channel::<Result<Feed, String>>(32);
    let decode_handle = spawn_decoder(feed_rx, ring, shared.clone(), events.clone());

    let mut demux = TsDemuxer::new();
    let mut current_segment = 0usize;
    let mut prefetch: Option<Prefetch> = None;

    'session: loop {
        if cancel.is_cancelled() {
            break;
        }

        // End of the list: live streams refetch and skip forward so the
        // next consumed sequence follows the last one played.
        if current_segment >= playlist.segments.len() {
            if !playlist.is_live {
                debug!("VOD playlist exhausted");
                break;
            }
            // Indices change across a refresh; a stale prefetch is useless.
            if let Some(pending) = prefetch.take() {
                let _ = pending.handle.await;
            }
            let wait = Duration::from_secs_f32((playlist.target_duration / 2.0).max(1.0));
            let refresh_url = playlist.url.clone();
            let last_played = shared
                .meta
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .last_played_sequence;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'session,
                    result = fetch_playlist(&client, &refresh_url) => {
                        match result {
                            Ok(fresh) => {
                                let next_seq = last_played + 1;
                                if fresh.media_sequence + fresh.segments.len() as u64 > next_seq {
                                    current_segment =
                                        next_seq.saturating_sub(fresh.media_sequence) as usize;
                                    playlist = fresh;
                                    debug!(
                                        media_sequence = playlist.media_sequence,
                                        current_segment, "live playlist refreshed"
                                    );
                                    continue 'session;
                                }
                                // Nothing new yet; wait out half a target
                                // duration and try again.
                            }
                            Err(err) => warn!(%err, "live playlist refresh failed"),
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => break 'session,
                            _ = tokio::time::sleep(wait) => {}
                        }
                    }
                }
            }
        }

        let segment = playlist.segments[current_segment].clone();

        // Use the prefetched body when it matches; always join the worker
        // before its buffer can be dropped.
        let mut body: Option<Bytes> = None;
        if let Some(pending) = prefetch.take() {
            let index = pending.index;
            match pending.handle.await {
                Ok(Some(data)) if index == current_segment => body = Some(data),
                Ok(_) => {}
                Err(err) => warn!(%err, "prefetch worker panicked"),
            }
        }
        let body = match body {
            Some(body) => body,
            None => match fetch_segment(&client, &segment.url, &cancel).await {
                Some(body) => body,
                None => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(url = %segment.url, "segment failed after retries, skipping");
                    advance(&shared, &playlist, &mut current_segment);
                    continue;
                }
            },
        };

        // Kick off the prefetch of the next segment before decoding this
        // one. Never started once stop is requested.
        if !cancel.is_cancelled() {
            if let Some(next) = playlist.segments.get(current_segment + 1) {
                let next_url = next.url.clone();
                let prefetch_client = client.clone();
                let prefetch_cancel = cancel.clone();
                prefetch = Some(Prefetch {
                    index: current_segment + 1,
                    handle: tokio::spawn(async move {
                        fetch_segment(&prefetch_client, &next_url, &prefetch_cancel).await
                    }),
                });
            }
        }

        if body.is_empty() {
            debug!(url = %segment.url, "zero-length segment skipped");
            advance(&shared, &playlist, &mut current_segment);
            continue;
        }

        // Bitrate estimate for the UI.
        if segment.duration > 0.0 {
            let kbps = (body.len() as f32 * 8.0 / (segment.duration * 1000.0)) as u32;
            shared
                .meta
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .bitrate_kbps = kbps;
        }

        // Now-playing metadata: EXTINF attributes first, inline ID3 wins
        // when present.
        apply_segment_meta(&shared, &events, &segment.title, &segment.artist);
        let mut payload: &[u8] = &body;
        if let Some(tag) = pktmeta::id3::parse_inline(payload) {
            if tag.title.is_some() || tag.artist.is_some() {
                apply_segment_meta(&shared, &events, &tag.title, &tag.artist);
            }
            payload = &payload[tag.tag_len..];
        }

        // Container detection: TS sync byte, else raw ADTS/MP3.
        let mut audio = Vec::with_capacity(payload.len());
        if payload.first() == Some(&0x47) {
            demux.demux(payload, &mut audio);
        } else {
            audio.extend_from_slice(payload);
        }

        if !audio.is_empty()
            && feed_tx.send(Ok(Feed::Chunk(Bytes::from(audio)))).await.is_err()
        {
            break; // decoder died, error already published
        }
        // Segment boundary: flush decoder transport state.
        if feed_tx.send(Ok(Feed::Flush)).await.is_err() {
            break;
        }

        advance(&shared, &playlist, &mut current_segment);
    }

    // Join any outstanding prefetch before the session unwinds.
    if let Some(pending) = prefetch.take() {
        let _ = pending.handle.await;
    }

    drop(feed_tx);
    let _ = decode_handle.await;

    if !matches!(shared.state(), RadioState::Error(_)) {
        shared.set_state(RadioState::Stopped);
    }
}

/// Marks the current segment consumed and steps to the next one.
fn advance(shared: &Shared, playlist: &HlsPlaylist, current_segment: &mut usize) {
    let sequence = playlist.media_sequence + *current_segment as u64;
    shared
        .meta
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .last_played_sequence = sequence;
    *current_segment += 1;
}

fn apply_segment_meta(
    shared: &Shared,
    events: &mpsc::UnboundedSender<RadioEvent>,
    title: &Option<String>,
    artist: &Option<String>,
) {
    if title.is_none() && artist.is_none() {
        return;
    }

    // A combined "Artist - Title" with no explicit artist gets split.
    let (artist, title) = match (artist.clone(), title.clone()) {
        (None, Some(combined)) => {
            let (a, t) = split_artist_title(&combined);
            (a, Some(t))
        }
        other => other,
    };

    let changed = {
        let mut meta = shared.meta.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = meta.title != title || meta.artist != artist;
        if changed {
            meta.title = title.clone();
            meta.artist = artist.clone();
        }
        changed
    };

    if changed {
        if let Some(title) = title {
            info!(?artist, %title, "now playing");
            let _ = events.send(RadioEvent::Metadata(pktmeta::icy::IcyTitle {
                artist,
                title,
            }));
        }
    }
}

/// Fetches one segment with the 100/200/300 ms retry schedule.
/// Returns `None` when every attempt failed or stop was requested.
async fn fetch_segment(client: &Client, url: &str, cancel: &CancellationToken) -> Option<Bytes> {
    for (attempt, backoff) in FETCH_BACKOFF_MS.iter().enumerate() {
        if cancel.is_cancelled() {
            return None;
        }
        match client.fetch(url).await {
            Ok(body) => return Some(body),
            Err(err) => {
                debug!(url, attempt, %err, "segment fetch failed");
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(Duration::from_millis(*backoff)) => {}
                }
            }
        }
    }
    None
}

fn spawn_decoder(
    feed_rx: mpsc::Receiver<Result<Feed, String>>,
    ring: Arc<RingBuffer>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || decode_loop(feed_rx, ring, shared, events))
}

/// Blocking decode: the first chunk picks AAC (ADTS sync at the head) or
/// MP3; both paths publish the stream rate on the first decoded frame.
fn decode_loop(
    mut feed_rx: mpsc::Receiver<Result<Feed, String>>,
    ring: Arc<RingBuffer>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<RadioEvent>,
) {
    let mut aac: Option<AacStreamDecoder> = None;
    let mut mp3_tx: Option<mpsc::Sender<Result<Bytes, String>>> = None;
    let mut mp3_thread: Option<std::thread::JoinHandle<()>> = None;
    let mut announced = false;

    while let Some(feed) = feed_rx.blocking_recv() {
        if shared.should_stop.load(Ordering::Relaxed) {
            break;
        }
        let feed = match feed {
            Ok(feed) => feed,
            Err(err) => {
                shared.fail(format!("HLS stream failed: {err}"));
                break;
            }
        };

        match feed {
            Feed::Chunk(chunk) => {
                // Format decision on the very first audio bytes.
                if aac.is_none() && mp3_tx.is_none() {
                    if adts::find_sync(&chunk, 0).is_some() {
                        aac = Some(AacStreamDecoder::new());
                    } else {
                        // The MP3 decoder pulls from a reader, so it gets a
                        // forwarding channel and its own thread.
                        let (tx, rx) = mpsc::channel::<Result<Bytes, String>>(32);
                        mp3_thread = Some(spawn_mp3_thread(
                            rx,
                            ring.clone(),
                            shared.clone(),
                            events.clone(),
                        ));
                        mp3_tx = Some(tx);
                    }
                }

                if let Some(aac) = aac.as_mut() {
                    let result = aac.push(&chunk, |pcm, channels, rate| {
                        if !announced && rate > 0 {
                            announced = true;
                            shared.sample_rate.store(rate, Ordering::Relaxed);
                            let _ = events.send(RadioEvent::Format { sample_rate: rate });
                        }
                        push_pcm(pcm, channels as usize, rate, &ring, &shared);
                    });
                    if let Err(err) = result {
                        warn!(%err, "AAC push failed, resynchronising");
                        aac.reset();
                    }
                } else if let Some(tx) = &mp3_tx {
                    if tx.blocking_send(Ok(chunk)).is_err() {
                        break;
                    }
                }
            }
            Feed::Flush => {
                if let Some(aac) = aac.as_mut() {
                    aac.reset();
                }
                // MP3 frames are self-delimiting; the sync scan handles
                // segment boundaries without an explicit flush.
            }
        }
    }

    drop(mp3_tx);
    if let Some(handle) = mp3_thread {
        let _ = handle.join();
    }
}

/// Dedicated thread for the pull-based MP3 decoder.
fn spawn_mp3_thread(
    rx: mpsc::Receiver<Result<Bytes, String>>,
    ring: Arc<RingBuffer>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut decoder = MiniMp3Decoder::new(ChannelReader::new(rx));
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
                    push_pcm(&frame.data, frame.channels, rate, &ring, &shared);
                }
                Err(MiniMp3Error::Eof) => return,
                Err(MiniMp3Error::InsufficientData) | Err(MiniMp3Error::SkippedData) => continue,
                Err(MiniMp3Error::Io(err)) => {
                    if !shared.should_stop.load(Ordering::Relaxed) {
                        shared.fail(format!("HLS MP3 decode failed: {err}"));
                    }
                    return;
                }
            }
        }
    })
}

/// Upmixes to stereo, writes into the ring with pacing, applies the
/// buffering hysteresis.
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

    if rate > 0 {
        let len = ring.len() as u64;
        let low = rate as u64 * BUFFER_LOW_SECS;
        let high = rate as u64 * BUFFER_HIGH_SECS;
        match shared.state() {
            RadioState::Playing if len < low => shared.set_state(RadioState::Buffering),
            RadioState::Buffering if len >= high => shared.set_state(RadioState::Playing),
            _ => {}
        }
    }
}
