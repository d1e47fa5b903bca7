//! ICY inline metadata parsing.
//!
//! Icecast/Shoutcast servers interleave metadata blocks into the audio body
//! every `icy-metaint` bytes. A block is `length_byte * 16` bytes of
//! `key='value';` pairs padded with NULs, in practice:
//! `StreamTitle='Artist - Title';StreamUrl='...';`

use crate::split_artist_title;

/// Metadata blocks longer than this are treated as stream corruption.
/// The length byte admits 255 * 16 = 4080 bytes at most by construction.
pub const MAX_METADATA_LEN: usize = 4080;

/// A parsed `StreamTitle` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcyTitle {
    pub artist: Option<String>,
    pub title: String,
}

/// Parses one inline metadata block.
///
/// Returns `None` when the block carries no (or an empty) `StreamTitle`.
/// The combined string is split into artist/title at the first `" - "`.
pub fn parse_stream_title(block: &[u8]) -> Option<IcyTitle> {
    if block.is_empty() || block.len() > MAX_METADATA_LEN {
        return None;
    }

    // NUL padding and non-UTF-8 junk both end the usable region.
    let text = String::from_utf8_lossy(block);
    let start = text.find("StreamTitle='")? + "StreamTitle='".len();
    let rest = &text[start..];
    let end = rest.find('\'')?;
    let combined = rest[..end].trim();

    if combined.is_empty() {
        return None;
    }

    let (artist, title) = split_artist_title(combined);
    Some(IcyTitle { artist, title })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_artist_and_title() {
        let block = b"StreamTitle='Daft Punk - Around the World';StreamUrl='';\0\0\0\0";
        let parsed = parse_stream_title(block).unwrap();
        assert_eq!(parsed.artist.as_deref(), Some("Daft Punk"));
        assert_eq!(parsed.title, "Around the World");
    }

    #[test]
    fn title_only_when_no_separator() {
        let block = b"StreamTitle='Station Jingle';";
        let parsed = parse_stream_title(block).unwrap();
        assert_eq!(parsed.artist, None);
        assert_eq!(parsed.title, "Station Jingle");
    }

    #[test]
    fn empty_title_is_none() {
        assert_eq!(parse_stream_title(b"StreamTitle='';"), None);
        assert_eq!(parse_stream_title(b""), None);
    }

    #[test]
    fn oversized_blocks_are_rejected() {
        let mut block = b"StreamTitle='x".to_vec();
        block.resize(MAX_METADATA_LEN + 1, b'x');
        assert_eq!(parse_stream_title(&block), None);
    }

    #[test]
    fn missing_stream_title_key_is_none() {
        assert_eq!(parse_stream_title(b"StreamUrl='http://x';"), None);
    }
}
