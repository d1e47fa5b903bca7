//! # pktcovers
//!
//! Asynchronous album-art fetching. A request checks the on-disk cache
//! first, then queries the iTunes Search API, downloads the artwork,
//! decodes it and publishes the image. The disk cache is keyed by a hash of
//! `"artist - title"` so repeated plays cost nothing.
//!
//! Publishing is generation-checked: every new request bumps a counter, the
//! fetch task carries the value it started with, and a finished task whose
//! generation is stale discards its result instead of publishing. Fetch
//! failures are logged and swallowed, so the UI just keeps showing no
//! artwork.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use serde::Deserialize;
use tracing::{debug, info, warn};

/// Default iTunes Search endpoint.
pub const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";

/// Errors inside the fetch pipeline (internal; requests never surface them).
#[derive(Debug, thiserror::Error)]
pub enum CoversError {
    #[error(transparent)]
    Net(#[from] pktnet::NetError),
    #[error("artwork decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("no artwork found")]
    NotFound,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded cover image plus the raw bytes it came from.
pub struct CoverArt {
    pub image: image::DynamicImage,
    pub raw: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "artworkUrl100")]
    artwork_url: Option<String>,
}

struct SharedState {
    generation: AtomicU64,
    slot: Mutex<Option<Arc<CoverArt>>>,
    fetching: AtomicBool,
}

/// The album-art fetcher. One instance lives for the whole player session.
pub struct CoverFetcher {
    client: pktnet::Client,
    cache_dir: PathBuf,
    search_url: String,
    state: Arc<SharedState>,
    last_request: Mutex<Option<(String, String)>>,
}

impl CoverFetcher {
    pub fn new(client: pktnet::Client, cache_dir: PathBuf) -> Self {
        Self::with_search_url(client, cache_dir, ITUNES_SEARCH_URL.to_string())
    }

    /// Test hook: point the search at a local server.
    pub fn with_search_url(client: pktnet::Client, cache_dir: PathBuf, search_url: String) -> Self {
        Self {
            client,
            cache_dir,
            search_url,
            state: Arc::new(SharedState {
                generation: AtomicU64::new(0),
                slot: Mutex::new(None),
                fetching: AtomicBool::new(false),
            }),
            last_request: Mutex::new(None),
        }
    }

    /// Requests artwork for a track. Idempotent per `(artist, title)`:
    /// repeating the previous request is a no-op. Returns immediately; the
    /// result appears via [`CoverFetcher::current`].
    pub fn request(&self, artist: &str, title: &str) {
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

        // A newer request invalidates whatever is in flight.
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.state.fetching.store(true, Ordering::Relaxed);

        let client = self.client.clone();
        let cache_dir = self.cache_dir.clone();
        let search_url = self.search_url.clone();
        let state = self.state.clone();
        let artist = artist.to_string();
        let title = title.to_string();

        tokio::spawn(async move {
            let result = fetch_cover(&client, &cache_dir, &search_url, &artist, &title).await;
            match result {
                Ok(art) => publish(&state, generation, Arc::new(art)),
                Err(err) => debug!(%artist, %title, %err, "cover fetch failed"),
            }
            if state.generation.load(Ordering::SeqCst) == generation {
                state.fetching.store(false, Ordering::Relaxed);
            }
        });
    }

    /// The most recently published artwork, if any.
    pub fn current(&self) -> Option<Arc<CoverArt>> {
        self.state
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.state.fetching.load(Ordering::Relaxed)
    }

    /// Drops the current artwork and invalidates any in-flight fetch.
    pub fn clear(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.state.fetching.store(false, Ordering::Relaxed);
        *self.state.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Total bytes in the artwork disk cache.
    pub fn cache_size(&self) -> u64 {
        dir_size(&self.cache_dir)
    }

    /// Removes every cached artwork file.
    pub fn clear_cache(&self) {
        clear_dir(&self.cache_dir);
    }
}

/// Publishes under the generation check: stale results are dropped.
fn publish(state: &SharedState, generation: u64, art: Arc<CoverArt>) {
    if state.generation.load(Ordering::SeqCst) != generation {
        debug!("discarding stale cover fetch result");
        return;
    }
    *state.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(art);
    info!("album art published");
}

async fn fetch_cover(
    client: &pktnet::Client,
    cache_dir: &Path,
    search_url: &str,
    artist: &str,
    title: &str,
) -> Result<CoverArt, CoversError> {
    let key = pktmeta::cache_hash(artist, title);

    // 1. Disk cache.
    if let Some(art) = load_cached(cache_dir, &key).await {
        debug!(%key, "cover served from disk cache");
        return Ok(art);
    }

    // 2. iTunes search.
    let term = format!("{artist} {title}");
    let url = format!(
        "{search_url}?term={}&media=music&limit=1",
        urlencode(term.trim())
    );
    let body = client.fetch(&url).await?;
    let response: SearchResponse = match serde_json::from_slice(&body) {
        Ok(response) => response,
        Err(err) => {
            debug!(%err, "iTunes response parse failed");
            return Err(CoversError::NotFound);
        }
    };

    let artwork_url = response
        .results
        .into_iter()
        .find_map(|r| r.artwork_url)
        .ok_or(CoversError::NotFound)?;
    // The search returns a 100x100 thumbnail; the full-size asset lives at
    // the same path.
    let artwork_url = artwork_url.replace("100x100", "600x600");

    // 3. Download and decode.
    let raw = client.fetch(&artwork_url).await?.to_vec();
    let image = image::load_from_memory(&raw)?;

    // 4. Store for next time; failures only cost the cache.
    let ext = extension_for(&artwork_url);
    let path = cache_dir.join(format!("{key}.{ext}"));
    if let Err(err) = tokio::fs::create_dir_all(cache_dir).await {
        warn!(%err, "cannot create cover cache dir");
    } else if let Err(err) = tokio::fs::write(&path, &raw).await {
        warn!(path = %path.display(), %err, "cover cache write failed");
    }

    Ok(CoverArt { image, raw })
}

/// Loads any cached image for `key`, whatever its extension.
async fn load_cached(cache_dir: &Path, key: &str) -> Option<CoverArt> {
    let mut entries = tokio::fs::read_dir(cache_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let matches = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| stem == key);
        if !matches {
            continue;
        }
        let raw = tokio::fs::read(&path).await.ok()?;
        // Short or truncated cache files count as a miss.
        match image::load_from_memory(&raw) {
            Ok(image) => return Some(CoverArt { image, raw }),
            Err(err) => {
                warn!(path = %path.display(), %err, "corrupt cache entry ignored");
                return None;
            }
        }
    }
    None
}

fn extension_for(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    if lower.contains(".png") {
        "png"
    } else if lower.contains(".webp") {
        "webp"
    } else {
        "jpg"
    }
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

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

fn clear_dir(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), %err, "cache file removal failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_handles_query_characters() {
        assert_eq!(urlencode("Daft Punk"), "Daft+Punk");
        assert_eq!(urlencode("AC/DC"), "AC%2FDC");
        assert_eq!(urlencode("100%"), "100%25");
        assert_eq!(urlencode("safe-chars_1.0~"), "safe-chars_1.0~");
    }

    #[test]
    fn extension_follows_artwork_url() {
        assert_eq!(extension_for("https://x/cover.png"), "png");
        assert_eq!(extension_for("https://x/cover.webp"), "webp");
        assert_eq!(extension_for("https://x/cover.jpg"), "jpg");
        assert_eq!(extension_for("https://x/cover"), "jpg");
    }
}
