//! # pkthls
//!
//! HTTP Live Streaming playback: playlist fetch/refresh, ordered segment
//! consumption with live sequence tracking, a one-shot prefetch worker per
//! segment boundary, MPEG-TS demultiplexing and per-segment inline ID3
//! metadata.
//!
//! Shares the radio state machine ([`pktradio::RadioState`]) and the same
//! ring-buffer hand-off to the audio callback.

mod playlist;
mod session;
mod ts;

pub use playlist::{
    fetch_playlist, is_hls_url, parse_playlist, resolve_url, HlsPlaylist, HlsSegment,
    ParsedPlaylist, MAX_SEGMENTS, PLAYLIST_FETCH_CAP,
};
pub use session::{HlsSession, HlsStatus};
pub use ts::TsDemuxer;

/// Errors raised by the HLS core.
#[derive(Debug, thiserror::Error)]
pub enum HlsError {
    #[error(transparent)]
    Net(#[from] pktnet::NetError),
    #[error("unparsable playlist: {0}")]
    Playlist(String),
    #[error("malformed URL: {0}")]
    Url(String),
}
