//! # pktmeta
//!
//! Track metadata for the player: what a track is called, how long it runs,
//! and any embedded cover art.
//!
//! Three extraction paths feed the same [`TrackInfo`] shape:
//! - local files via lofty (ID3v1/v2, Vorbis comments, MP4 atoms)
//! - ICY inline metadata blocks from Icecast/Shoutcast streams
//! - ID3v2 tags prepended to HLS media segments

use std::path::Path;

pub mod icy;
pub mod id3;
mod track_info;

pub use track_info::read_track_info;

/// Errors raised while reading metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("tag read error: {0}")]
    Tag(#[from] lofty::error::LoftyError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Title/artist/album plus duration and optional embedded art.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: u64,
    /// Raw bytes of the embedded front cover, when present.
    pub art: Option<Vec<u8>>,
}

impl TrackInfo {
    /// Display title, falling back to the file stem when untagged.
    pub fn display_title(&self, path: &Path) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Cache key for per-track artwork and lyrics files.
///
/// DJB2 over `"artist - title"`, formatted as eight hex digits. Stable
/// across runs, so the on-disk caches survive restarts.
pub fn cache_hash(artist: &str, title: &str) -> String {
    let combined = format!("{artist} - {title}");
    let mut hash: u32 = 5381;
    for byte in combined.bytes() {
        hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(byte as u32);
    }
    format!("{hash:08x}")
}

/// Splits `"Artist - Title"` at the first `" - "`.
///
/// Returns `(artist, title)`; the artist is `None` when no separator exists.
/// Shared by the ICY and in-stream ID3 paths, which both carry combined
/// strings.
pub fn split_artist_title(combined: &str) -> (Option<String>, String) {
    match combined.split_once(" - ") {
        Some((artist, title)) => (Some(artist.to_string()), title.to_string()),
        None => (None, combined.to_string()),
    }
}
