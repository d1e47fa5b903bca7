//! # pktradio
//!
//! Direct Icecast/Shoutcast playback: the producer task that connects with
//! `Icy-MetaData: 1`, splits inline metadata out of the body, frames the
//! audio bytes (MP3 sync scan or ADTS) and keeps the shared ring buffer
//! fed. The station lists the radio UI browses live here too.
//!
//! ## State machine
//!
//! ```text
//! STOPPED → CONNECTING → BUFFERING ⇄ PLAYING
//!                   ↘ ERROR(msg)
//! ```
//!
//! BUFFERING→PLAYING at ~6 s of buffered audio, PLAYING→BUFFERING below
//! ~2 s; the gap prevents thrashing around one threshold.

mod curated;
mod icydemux;
mod session;
mod station;

pub use curated::{load_catalogues, CuratedCatalogue, CuratedStation};
pub use icydemux::IcyDemux;
pub use session::{RadioEvent, RadioSession, RadioStatus};
pub use station::{RadioStation, StationList, MAX_STATIONS};

/// Errors raised by the radio core.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error(transparent)]
    Net(#[from] pktnet::NetError),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stations file error: {0}")]
    Stations(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection/playback state surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RadioState {
    #[default]
    Stopped,
    Connecting,
    Buffering,
    Playing,
    Error(String),
}

impl RadioState {
    pub fn is_active(&self) -> bool {
        matches!(self, RadioState::Connecting | RadioState::Buffering | RadioState::Playing)
    }
}
