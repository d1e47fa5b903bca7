//! Local-file tag extraction using lofty.

use std::path::Path;

use lofty::{config::ParseOptions, picture::PictureType, prelude::*, probe::Probe};
use tracing::debug;

use crate::{MetaError, TrackInfo};

/// Reads title/artist/album, duration and embedded front cover from a local
/// audio file. Works for ID3v1/v2 (MP3, AAC), Vorbis comments (FLAC, Ogg,
/// Opus) and MP4 atoms (M4A).
pub fn read_track_info(path: &Path) -> Result<TrackInfo, MetaError> {
    debug!(path = %path.display(), "reading track tags");

    let tagged_file = Probe::open(path)?.options(ParseOptions::new()).read()?;
    let duration_ms = tagged_file.properties().duration().as_millis() as u64;

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

    let mut info = TrackInfo {
        duration_ms,
        ..TrackInfo::default()
    };

    if let Some(tag) = tag {
        info.title = tag.title().map(|s| s.to_string());
        info.artist = tag.artist().map(|s| s.to_string());
        info.album = tag.album().map(|s| s.to_string());
        info.art = front_cover(tag.pictures());
    } else {
        debug!(path = %path.display(), "file carries no tags");
    }

    Ok(info)
}

/// Picks the embedded picture to show: the front cover (APIC picture type 3)
/// when present, otherwise the first picture in the tag.
fn front_cover(pictures: &[lofty::picture::Picture]) -> Option<Vec<u8>> {
    pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
        .map(|p| p.data().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_error() {
        let err = read_track_info(Path::new("/no/such/file.mp3"));
        assert!(err.is_err());
    }
}
