//! M3U8 playlist parsing and fetching.

use pktnet::Client;
use tracing::{debug, warn};
use url::Url;

use crate::HlsError;

/// Byte cap on playlist fetches.
pub const PLAYLIST_FETCH_CAP: usize = 64 * 1024;

/// Segment ceiling per playlist refresh; overflow is logged and dropped.
pub const MAX_SEGMENTS: usize = 64;

/// Master playlists are followed at most this deep.
const MAX_VARIANT_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct HlsSegment {
    pub url: String,
    pub duration: f32,
    pub title: Option<String>,
    pub artist: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HlsPlaylist {
    /// URL the playlist was fetched from (refreshes re-use it).
    pub url: String,
    pub media_sequence: u64,
    pub target_duration: f32,
    pub is_live: bool,
    pub segments: Vec<HlsSegment>,
}

/// Outcome of parsing one M3U8 document.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPlaylist {
    Media(HlsPlaylist),
    /// A master playlist; playback continues with its first variant.
    Master { variant_url: String },
}

/// An HLS URL is recognised by its `.m3u8` extension, anywhere in the URL
/// (query strings included).
pub fn is_hls_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains(".m3u8")
}

/// Resolves a possibly-relative segment reference against the playlist URL.
pub fn resolve_url(base: &str, reference: &str) -> Result<String, HlsError> {
    let base = Url::parse(base).map_err(|e| HlsError::Url(e.to_string()))?;
    base.join(reference)
        .map(|u| u.to_string())
        .map_err(|e| HlsError::Url(e.to_string()))
}

/// Parses an M3U8 document fetched from `url`.
pub fn parse_playlist(content: &str, url: &str) -> Result<ParsedPlaylist, HlsError> {
    if !content.trim_start().starts_with("#EXTM3U") {
        return Err(HlsError::Playlist("missing #EXTM3U header".into()));
    }
    let lines = content.lines().map(str::trim);

    let mut playlist = HlsPlaylist {
        url: url.to_string(),
        media_sequence: 0,
        target_duration: 10.0,
        is_live: true,
        segments: Vec::new(),
    };

    let mut is_master = false;
    let mut pending_duration = 0.0f32;
    let mut pending_title: Option<String> = None;
    let mut pending_artist: Option<String> = None;
    let mut overflowed = false;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            playlist.target_duration = rest.parse().unwrap_or(10.0);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence = rest.parse().unwrap_or(0);
        } else if line.starts_with("#EXT-X-STREAM-INF:") {
            is_master = true;
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            pending_duration = rest
                .split([',', ' '])
                .next()
                .and_then(|d| d.parse().ok())
                .unwrap_or(0.0);
            pending_title = quoted_attribute(rest, "title=\"");
            pending_artist = quoted_attribute(rest, "artist=\"");
        } else if line.starts_with("#EXT-X-ENDLIST") {
            playlist.is_live = false;
        } else if !line.starts_with('#') {
            // A URI line: the first variant of a master playlist, or a
            // media segment.
            let resolved = resolve_url(url, line)?;
            if is_master {
                return Ok(ParsedPlaylist::Master { variant_url: resolved });
            }
            if playlist.segments.len() >= MAX_SEGMENTS {
                overflowed = true;
                continue;
            }
            playlist.segments.push(HlsSegment {
                url: resolved,
                duration: pending_duration,
                title: pending_title.take(),
                artist: pending_artist.take(),
            });
            pending_duration = 0.0;
        }
    }

    if overflowed {
        warn!(
            max = MAX_SEGMENTS,
            url, "playlist exceeds the segment ceiling, tail dropped"
        );
    }

    Ok(ParsedPlaylist::Media(playlist))
}

/// Extracts a `key="value"` attribute from an EXTINF line.
fn quoted_attribute(line: &str, marker: &str) -> Option<String> {
    let start = line.find(marker)? + marker.len();
    let rest = &line[start..];
    let end = rest.find('"')?;
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Fetches and parses a playlist, following master playlists down to their
/// first variant.
pub async fn fetch_playlist(client: &Client, url: &str) -> Result<HlsPlaylist, HlsError> {
    let mut current = url.to_string();
    for _ in 0..MAX_VARIANT_DEPTH {
        let body = client.fetch_capped(&current, PLAYLIST_FETCH_CAP).await?;
        let text = String::from_utf8_lossy(&body);
        match parse_playlist(&text, &current)? {
            ParsedPlaylist::Media(playlist) => {
                debug!(
                    url = %current,
                    segments = playlist.segments.len(),
                    media_sequence = playlist.media_sequence,
                    is_live = playlist.is_live,
                    "playlist fetched"
                );
                return Ok(playlist);
            }
            ParsedPlaylist::Master { variant_url } => {
                debug!(master = %current, variant = %variant_url, "following master playlist");
                current = variant_url;
            }
        }
    }
    Err(HlsError::Playlist("master playlist nesting too deep".into()))
}
