//! # pktplayer
//!
//! The playback session façade. One [`Player`] value owns the ring buffer,
//! the audio callback state, the sink manager, the metadata fetchers, and
//! whichever of the three source kinds is active:
//!
//! - local files (decode thread → resampler → ring),
//! - direct Icecast/Shoutcast streams ([`pktradio`]),
//! - HLS streams ([`pkthls`]).
//!
//! The three are mutually exclusive; starting one stops the others. The
//! host (UI) holds an `Arc<Player>` and polls [`Player::status`].

use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use pktaudio::{AudioSink, RingBuffer, RoutingWatcher, SinkManager, DEFAULT_RING_FRAMES};
use pktconfig::{Paths, Settings};
use pktcovers::CoverFetcher;
use pktdecode::StreamDecoder;
use pkthls::{is_hls_url, HlsSession, HlsStatus};
use pktlyrics::LyricsFetcher;
use pktmeta::TrackInfo;
use pktradio::{RadioEvent, RadioSession, RadioStatus};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod callback;
mod local;

pub use callback::CallbackState;
pub use local::LocalSession;

/// Errors surfaced by the player façade.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error(transparent)]
    Config(#[from] pktconfig::ConfigError),
    #[error(transparent)]
    Audio(#[from] pktaudio::AudioError),
    #[error(transparent)]
    Decode(#[from] pktdecode::DecodeError),
    #[error(transparent)]
    Meta(#[from] pktmeta::MetaError),
    #[error("operation not valid now: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Net(#[from] pktnet::NetError),
}

/// Local playback state for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Snapshot of local playback.
#[derive(Debug, Clone, Default)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub track: Option<TrackInfo>,
    pub repeat: bool,
}

pub struct Player {
    client: pktnet::Client,
    paths: Paths,
    settings: Mutex<Settings>,
    /// The user's sink choice; `.asoundrc` routing can override it.
    selected_sink: Mutex<AudioSink>,
    ring: Arc<RingBuffer>,
    callback: Arc<CallbackState>,
    sink: Mutex<SinkManager>,
    local: Mutex<Option<LocalSession>>,
    radio: tokio::sync::Mutex<Option<RadioSession>>,
    hls: tokio::sync::Mutex<Option<HlsSession>>,
    track: Mutex<Option<TrackInfo>>,
    repeat: std::sync::atomic::AtomicBool,
    covers: CoverFetcher,
    lyrics: LyricsFetcher,
}

impl Player {
    /// Builds a player with a real audio device.
    pub fn new(paths: Paths) -> Result<Arc<Self>, PlayerError> {
        Self::build(paths, false)
    }

    /// Builds a player that opens no audio hardware (tests, headless use).
    pub fn new_null(paths: Paths) -> Result<Arc<Self>, PlayerError> {
        Self::build(paths, true)
    }

    fn build(paths: Paths, null_audio: bool) -> Result<Arc<Self>, PlayerError> {
        // An unwritable settings directory is an unrecoverable init
        // failure; hosts exit non-zero on it.
        paths.ensure_writable()?;

        let settings = Settings::load(&paths.settings_file());
        let client = pktnet::Client::new()?;
        let ring = Arc::new(RingBuffer::new(DEFAULT_RING_FRAMES));
        let callback = Arc::new(CallbackState::new(ring.clone()));

        let source: Arc<dyn pktaudio::SampleSource> = callback.clone();
        let sink = if null_audio {
            SinkManager::new_null(source)
        } else {
            SinkManager::new(source)
        };

        let covers = CoverFetcher::new(client.clone(), paths.album_art_cache_dir());
        let lyrics = LyricsFetcher::new(client.clone(), paths.lyrics_cache_dir());

        Ok(Arc::new(Self {
            client,
            paths,
            settings: Mutex::new(settings),
            selected_sink: Mutex::new(AudioSink::Speaker),
            ring,
            callback,
            sink: Mutex::new(sink),
            local: Mutex::new(None),
            radio: tokio::sync::Mutex::new(None),
            hls: tokio::sync::Mutex::new(None),
            track: Mutex::new(None),
            repeat: std::sync::atomic::AtomicBool::new(false),
            covers,
            lyrics,
        }))
    }

    // -----------------------------------------------------------------
    // Local playback
    // -----------------------------------------------------------------

    /// Loads and starts playing a local file.
    pub async fn load(self: &Arc<Self>, path: &Path) -> Result<TrackInfo, PlayerError> {
        self.stop().await;

        let track = match pktmeta::read_track_info(path) {
            Ok(track) => track,
            Err(err) => {
                warn!(path = %path.display(), %err, "tag read failed, playing untagged");
                TrackInfo::default()
            }
        };

        let decoder = StreamDecoder::open(path)?;
        let decoder_info = decoder.info();

        let sink_kind = self.active_sink_kind();
        let rate = sink_kind.native_rate();
        {
            let mut sink = self.lock_sink();
            sink.open(sink_kind)?;
            sink.set_paused(false);
        }
        self.apply_dsp(sink_kind, rate);
        self.callback.set_consumed_frames(0);
        self.callback.set_active(true);

        let session = LocalSession::start(
            path.to_path_buf(),
            decoder,
            self.ring.clone(),
            self.callback.clone(),
            rate,
            self.repeat.load(std::sync::atomic::Ordering::Relaxed),
        )?;

        let duration_ms = if track.duration_ms > 0 {
            track.duration_ms
        } else {
            session.duration_ms
        };
        let mut track = track;
        track.duration_ms = duration_ms;

        info!(
            path = %path.display(),
            duration_ms,
            source_rate = decoder_info.sample_rate,
            "local playback started"
        );

        *self.lock(&self.local) = Some(session);
        *self.lock(&self.track) = Some(track.clone());
        self.request_track_metadata(&track);

        Ok(track)
    }

    /// Pause/resume toggle for local playback.
    pub fn set_paused(&self, paused: bool) {
        self.lock_sink().set_paused(paused);
    }

    /// Seeks local playback to an absolute position.
    pub fn seek_ms(&self, position_ms: u64) -> Result<(), PlayerError> {
        let local = self.lock(&self.local);
        let session = local
            .as_ref()
            .ok_or(PlayerError::InvalidState("seek without a loaded track"))?;
        session.seek(position_ms);
        Ok(())
    }

    pub fn set_repeat(&self, repeat: bool) {
        self.repeat
            .store(repeat, std::sync::atomic::Ordering::Relaxed);
        if let Some(session) = self.lock(&self.local).as_ref() {
            session.set_repeat(repeat);
        }
    }

    /// Linear volume, 0..1 (the perceptual curve applies downstream).
    pub fn set_volume(&self, linear: f32) {
        self.callback.set_volume(linear);
    }

    /// Local playback snapshot.
    pub fn status(&self) -> PlayerStatus {
        let local = self.lock(&self.local);
        let track = self.lock(&self.track).clone();
        let repeat = self.repeat.load(std::sync::atomic::Ordering::Relaxed);

        let Some(session) = local.as_ref() else {
            return PlayerStatus {
                state: PlayerState::Stopped,
                position_ms: 0,
                duration_ms: track.as_ref().map(|t| t.duration_ms).unwrap_or(0),
                track,
                repeat,
            };
        };

        let state = if session.is_finished() {
            PlayerState::Stopped
        } else if self.lock_sink().is_paused() {
            PlayerState::Paused
        } else {
            PlayerState::Playing
        };

        let rate = self
            .lock_sink()
            .current()
            .map(|(_, rate)| rate)
            .unwrap_or(pktaudio::RATE_SPEAKER);
        PlayerStatus {
            state,
            position_ms: self.callback.consumed_frames() * 1000 / rate.max(1) as u64,
            duration_ms: session.duration_ms,
            track,
            repeat,
        }
    }

    // -----------------------------------------------------------------
    // Radio / HLS
    // -----------------------------------------------------------------

    /// Starts a network stream, routing `.m3u8` URLs through the HLS core
    /// and everything else through the direct Icecast path.
    pub async fn play_stream(self: &Arc<Self>, url: &str) -> Result<(), PlayerError> {
        self.stop().await;

        self.callback.set_consumed_frames(0);
        self.callback.set_active(true);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(event_pump(self.clone(), events_rx));

        if is_hls_url(url) {
            let session = HlsSession::start(
                self.client.clone(),
                url.to_string(),
                self.ring.clone(),
                events_tx,
            );
            *self.hls.lock().await = Some(session);
        } else {
            let session = RadioSession::start(
                self.client.clone(),
                url.to_string(),
                self.ring.clone(),
                events_tx,
            );
            *self.radio.lock().await = Some(session);
        }
        Ok(())
    }

    pub async fn radio_status(&self) -> Option<RadioStatus> {
        self.radio.lock().await.as_ref().map(|s| s.status())
    }

    pub async fn hls_status(&self) -> Option<HlsStatus> {
        self.hls.lock().await.as_ref().map(|s| s.status())
    }

    /// Stops every active session and clears the shared audio path.
    pub async fn stop(&self) {
        if let Some(session) = self.lock(&self.local).take() {
            session.stop();
        }
        if let Some(session) = self.radio.lock().await.take() {
            session.stop().await;
        }
        if let Some(session) = self.hls.lock().await.take() {
            session.stop().await;
        }

        self.callback.set_active(false);
        self.callback.set_consumed_frames(0);
        self.ring.clear();
        self.covers.clear();
        self.lyrics.clear();
        *self.lock(&self.track) = None;
        self.lock_sink().set_paused(false);
    }

    // -----------------------------------------------------------------
    // Sink and settings
    // -----------------------------------------------------------------

    /// The settings layer's explicit sink choice.
    pub fn set_selected_sink(&self, sink: AudioSink) -> Result<(), PlayerError> {
        *self.lock(&self.selected_sink) = sink;
        self.reconfigure_sink(sink)
    }

    /// Reacts to an audio routing configuration change: re-detects the
    /// sink and reopens the device live.
    pub fn handle_routing_change(&self, routing_config: &str) -> Result<(), PlayerError> {
        let selected = *self.lock(&self.selected_sink);
        let sink = AudioSink::detect(selected, routing_config);
        info!(?sink, "audio routing changed");
        self.reconfigure_sink(sink)
    }

    /// Watches `home_dir` for routing-config changes for the lifetime of
    /// the returned watcher.
    pub fn start_routing_watcher(
        self: &Arc<Self>,
        home_dir: &Path,
    ) -> Result<RoutingWatcher, PlayerError> {
        let player = self.clone();
        let routing_path = home_dir.join(pktaudio::ROUTING_FILE);
        let watcher = RoutingWatcher::new(home_dir, move || {
            let routing = std::fs::read_to_string(&routing_path).unwrap_or_default();
            if let Err(err) = player.handle_routing_change(&routing) {
                warn!(%err, "routing reconfiguration failed");
            }
        })?;
        Ok(watcher)
    }

    fn reconfigure_sink(&self, sink: AudioSink) -> Result<(), PlayerError> {
        let landed = self.lock_sink().reconfigure(sink)?;
        let rate = self.stream_rate_override().unwrap_or(landed.native_rate());
        if rate != landed.native_rate() {
            let mut manager = self.lock_sink();
            let was_paused = manager.is_paused();
            manager.open_at(landed, rate)?;
            manager.set_paused(was_paused);
        }

        self.apply_dsp(landed, rate);
        if let Some(session) = self.lock(&self.local).as_ref() {
            session.set_dest_rate(rate);
        }
        Ok(())
    }

    /// Live streams keep the device at the stream's native rate, except on
    /// Bluetooth where the A2DP link dictates 44.1 kHz.
    fn stream_rate_override(&self) -> Option<u32> {
        if *self.lock(&self.selected_sink) == AudioSink::Bluetooth {
            return None;
        }
        let radio_rate = self
            .radio
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.sample_rate()));
        let hls_rate = self
            .hls
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.sample_rate()));
        radio_rate.or(hls_rate).filter(|rate| *rate > 0)
    }

    /// Applies a settings mutation and pushes the DSP consequences.
    pub fn update_settings(&self, apply: impl FnOnce(&mut Settings)) -> Result<(), PlayerError> {
        let snapshot = {
            let mut settings = self.lock(&self.settings);
            apply(&mut settings);
            settings.save(&self.paths.settings_file())?;
            settings.clone()
        };
        if let Some((sink, rate)) = self.lock_sink().current() {
            self.callback
                .configure_dsp(&snapshot, sink.wants_speaker_dsp(), rate);
        }
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        self.lock(&self.settings).clone()
    }

    pub fn covers(&self) -> &CoverFetcher {
        &self.covers
    }

    pub fn lyrics(&self) -> &LyricsFetcher {
        &self.lyrics
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Frames currently buffered between producer and callback (UI buffer
    /// indicator).
    pub fn buffered_frames(&self) -> usize {
        self.ring.len()
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn active_sink_kind(&self) -> AudioSink {
        *self.lock(&self.selected_sink)
    }

    fn apply_dsp(&self, sink: AudioSink, rate: u32) {
        let settings = self.lock(&self.settings).clone();
        self.callback
            .configure_dsp(&settings, sink.wants_speaker_dsp(), rate);
    }

    fn request_track_metadata(&self, track: &TrackInfo) {
        let artist = track.artist.clone().unwrap_or_default();
        let title = track.title.clone().unwrap_or_default();
        if artist.is_empty() && title.is_empty() {
            return;
        }
        self.covers.request(&artist, &title);
        if self.lock(&self.settings).lyrics_enabled {
            self.lyrics
                .request(&artist, &title, track.duration_ms / 1000);
        }
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sink(&self) -> std::sync::MutexGuard<'_, SinkManager> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consumes events from a live stream session: metadata changes feed the
/// cover/lyrics fetchers, the format announcement reopens the device at the
/// stream's native rate and resumes it.
async fn event_pump(player: Arc<Player>, mut events: mpsc::UnboundedReceiver<RadioEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RadioEvent::Metadata(title) => {
                let artist = title.artist.clone().unwrap_or_default();
                player.covers.request(&artist, &title.title);
                if player.lock(&player.settings).lyrics_enabled {
                    player.lyrics.request(&artist, &title.title, 0);
                }
            }
            RadioEvent::Format { sample_rate } => {
                debug!(sample_rate, "stream format announced");
                let sink = player.active_sink_kind();
                let rate = if sink == AudioSink::Bluetooth {
                    sink.native_rate()
                } else {
                    sample_rate
                };
                let mut manager = player.lock_sink();
                if let Err(err) = manager.open_at(sink, rate) {
                    warn!(%err, "device reopen at stream rate failed");
                } else {
                    manager.set_paused(false);
                }
                drop(manager);
                player.apply_dsp(sink, rate);
            }
        }
    }
    debug!("stream event pump finished");
}
