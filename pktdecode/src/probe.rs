//! Format probing.
//!
//! Local files are routed by extension; radio streams by Content-Type.
//! HLS playlists (`.m3u8`) never reach this table, the radio layer routes
//! them before a decoder is chosen.

use std::path::Path;

use crate::AudioFormat;

/// Maps a file extension to a format tag, case-insensitively.
pub fn format_from_extension(path: &Path) -> Option<AudioFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp3" => Some(AudioFormat::Mp3),
        "wav" => Some(AudioFormat::Wav),
        "flac" => Some(AudioFormat::Flac),
        "ogg" => Some(AudioFormat::Ogg),
        "opus" => Some(AudioFormat::Opus),
        "m4a" => Some(AudioFormat::M4a),
        "aac" => Some(AudioFormat::Aac),
        _ => None,
    }
}

/// Maps an HTTP Content-Type to the framing used for live streams.
///
/// Defaults to MP3, which is what the long tail of Shoutcast servers sends
/// with imprecise content types.
pub fn format_from_content_type(content_type: &str) -> AudioFormat {
    let ct = content_type.trim().to_ascii_lowercase();
    if ct.contains("aac") || ct.contains("mp4") || ct.contains("m4a") {
        AudioFormat::Aac
    } else {
        AudioFormat::Mp3
    }
}
