//! # pktlyrics
//!
//! Synchronised lyrics for the player. Source order per track:
//!
//! 1. the on-disk LRC cache (hash of `"artist - title"`),
//! 2. the LRCLIB exact endpoint (`/api/get` with artist, track, duration),
//! 3. the LRCLIB fuzzy search (`/api/search`), first hit with non-empty
//!    `syncedLyrics`.
//!
//! Successful fetches are written back to the cache as raw LRC. Publishing
//! is generation-checked exactly like the cover fetcher: a newer request
//! invalidates anything still in flight, and failures are swallowed; the
//! lyrics pane just stays empty.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use serde::Deserialize;
use tracing::{debug, info, warn};

mod lrc;

pub use lrc::{parse_lrc, render_lrc, LyricLine, LyricsIndex};

/// Default LRCLIB API base.
pub const LRCLIB_BASE_URL: &str = "https://lrclib.net";

#[derive(Debug, thiserror::Error)]
pub enum LyricsError {
    #[error(transparent)]
    Net(#[from] pktnet::NetError),
    #[error("no synced lyrics found")]
    NotFound,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct LrclibRecord {
    #[serde(rename = "syncedLyrics")]
    synced_lyrics: Option<String>,
}

struct SharedState {
    generation: AtomicU64,
    slot: Mutex<Option<Arc<LyricsIndex>>>,
    fetching: AtomicBool,
}

/// The lyrics fetcher; one per player session.
pub struct LyricsFetcher {
    client: pktnet::Client,
    cache_dir: PathBuf,
    base_url: String,
    state: Arc<SharedState>,
    last_request: Mutex<Option<(String, String)>>,
}

impl LyricsFetcher {
    pub fn new(client: pktnet::Client, cache_dir: PathBuf) -> Self {
        Self::with_base_url(client, cache_dir, LRCLIB_BASE_URL.to_string())
    }

    /// Test hook: point the API at a local server.
    pub fn with_base_url(client: pktnet::Client, cache_dir: PathBuf, base_url: String) -> Self {
        Self {
            client,
            cache_dir,
            base_url,
            state: Arc::new(SharedState {
                generation: AtomicU64::new(0),
                slot: Mutex::new(None),
                fetching: AtomicBool::new(false),
            }),
            last_request: Mutex::new(None),
        }
    }

    /// Requests lyrics for a track. Idempotent per `(artist, title)`;
    /// results appear via [`LyricsFetcher::current`].
    pub fn request(&self, artist: &str, title: &str, duration_sec: u64) {
        if artist.is_empty() && title.is_empty() {
            return;
        }

        {
            let mut last = self
                .last_request
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.as_ref().is_some_and(|(a, t)| a == artist && t == title) {
                return;
            }
            *last = Some((artist.to_string(), title.to_string()));
        }

        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.state.fetching.store(true, Ordering::Relaxed);

        let client = self.client.clone();
        let cache_dir = self.cache_dir.clone();
        let base_url = self.base_url.clone();
        let state = self.state.clone();
        let artist = artist.to_string();
        let title = title.to_string();

        tokio::spawn(async move {
            match fetch_lyrics(&client, &cache_dir, &base_url, &artist, &title, duration_sec).await
            {
                Ok(index) => publish(&state, generation, Arc::new(index)),
                Err(err) => debug!(%artist, %title, %err, "lyrics fetch failed"),
            }
            if state.generation.load(Ordering::SeqCst) == generation {
                state.fetching.store(false, Ordering::Relaxed);
            }
        });
    }

    /// The most recently published index, if any.
    pub fn current(&self) -> Option<Arc<LyricsIndex>> {
        self.state
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.state.fetching.load(Ordering::Relaxed)
    }

    /// Drops current lyrics and invalidates in-flight fetches.
    pub fn clear(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.state.fetching.store(false, Ordering::Relaxed);
        *self.state.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Total bytes in the lyrics cache directory.
    pub fn cache_size(&self) -> u64 {
        let Ok(entries) = std::fs::read_dir(&self.cache_dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }

    /// Removes every cached `.lrc` file.
    pub fn clear_cache(&self) {
        let Ok(entries) = std::fs::read_dir(&self.cache_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Err(err) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), %err, "lyrics cache removal failed");
                }
            }
        }
    }
}

fn publish(state: &SharedState, generation: u64, index: Arc<LyricsIndex>) {
    if state.generation.load(Ordering::SeqCst) != generation {
        debug!("discarding stale lyrics fetch result");
        return;
    }
    info!(lines = index.len(), "lyrics published");
    *state.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(index);
}

async fn fetch_lyrics(
    client: &pktnet::Client,
    cache_dir: &Path,
    base_url: &str,
    artist: &str,
    title: &str,
    duration_sec: u64,
) -> Result<LyricsIndex, LyricsError> {
    let cache_path = cache_dir.join(format!("{}.lrc", pktmeta::cache_hash(artist, title)));

    // 1. Disk cache. Empty or unparsable files count as a miss.
    if let Ok(text) = tokio::fs::read_to_string(&cache_path).await {
        let lines = parse_lrc(&text);
        if !lines.is_empty() {
            debug!(path = %cache_path.display(), "lyrics served from disk cache");
            return Ok(LyricsIndex::new(lines));
        }
    }

    // 2. Exact match.
    let exact_url = format!(
        "{base_url}/api/get?artist_name={}&track_name={}&duration={duration_sec}",
        urlencode(artist),
        urlencode(title)
    );
    let mut synced = match client.fetch(&exact_url).await {
        Ok(body) => serde_json::from_slice::<LrclibRecord>(&body)
            .ok()
            .and_then(|r| r.synced_lyrics)
            .filter(|s| !s.is_empty()),
        Err(err) => {
            debug!(%err, "LRCLIB exact lookup failed");
            None
        }
    };

    // 3. Fuzzy search fallback.
    if synced.is_none() {
        let search_url = format!(
            "{base_url}/api/search?q={}",
            urlencode(&format!("{artist} {title}"))
        );
        synced = match client.fetch(&search_url).await {
            Ok(body) => serde_json::from_slice::<Vec<LrclibRecord>>(&body)
                .ok()
                .and_then(|records| {
                    records
                        .into_iter()
                        .find_map(|r| r.synced_lyrics.filter(|s| !s.is_empty()))
                }),
            Err(err) => {
                debug!(%err, "LRCLIB search failed");
                None
            }
        };
    }

    let synced = synced.ok_or(LyricsError::NotFound)?;
    let lines = parse_lrc(&synced);
    if lines.is_empty() {
        return Err(LyricsError::NotFound);
    }

    // Cache the raw LRC for next time; a failed write only costs the cache.
    if let Err(err) = tokio::fs::create_dir_all(cache_dir).await {
        warn!(%err, "cannot create lyrics cache dir");
    } else if let Err(err) = tokio::fs::write(&cache_path, &synced).await {
        warn!(path = %cache_path.display(), %err, "lyrics cache write failed");
    }

    Ok(LyricsIndex::new(lines))
}

/// Query-string percent encoding (space as `+`).
fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("Sigur Rós"), "Sigur+R%C3%B3s");
        assert_eq!(urlencode("a&b=c"), "a%26b%3Dc");
    }
}
