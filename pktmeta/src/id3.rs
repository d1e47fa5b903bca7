//! Minimal ID3v2 parser for tags embedded in live streams.
//!
//! HLS media segments (and some raw AAC streams) prepend an ID3v2 tag that
//! carries the now-playing metadata. Only the frames those streams actually
//! use are read: TIT2, TPE1, and the TXXX/PRIV frames some encoders smuggle
//! a `StreamTitle='...'` into. The caller gets the total tag length back so
//! it can skip the tag before feeding the decoder.
//!
//! Full tag extraction for local files goes through lofty instead; this
//! parser exists for the mid-stream case where there is no file to probe.

use crate::split_artist_title;

/// Outcome of parsing an inline tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineId3 {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Total tag size in bytes, including the 10-byte header.
    pub tag_len: usize,
}

/// Parses an ID3v2 tag at the head of `data`.
///
/// Returns `None` when `data` does not start with a complete tag.
pub fn parse_inline(data: &[u8]) -> Option<InlineId3> {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return None;
    }

    let version_major = data[3];
    let tag_size = syncsafe_u32(&data[6..10]) as usize;
    let total = 10usize.checked_add(tag_size)?;
    if total > data.len() {
        return None;
    }

    let mut result = InlineId3 {
        tag_len: total,
        ..InlineId3::default()
    };

    let mut pos = 10;
    while pos + 10 <= total {
        let frame_id = &data[pos..pos + 4];
        if frame_id.iter().all(|b| *b == 0) {
            break; // padding
        }

        // ID3v2.4 frame sizes are syncsafe; v2.3 uses plain big-endian.
        let frame_size = if version_major >= 4 {
            syncsafe_u32(&data[pos + 4..pos + 8]) as usize
        } else {
            u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                as usize
        };
        if frame_size == 0 || pos + 10 + frame_size > total {
            break;
        }

        let body = &data[pos + 10..pos + 10 + frame_size];
        match frame_id {
            b"TIT2" => {
                if let Some(text) = decode_text_frame(body) {
                    result.title = Some(text);
                }
            }
            b"TPE1" => {
                if let Some(text) = decode_text_frame(body) {
                    result.artist = Some(text);
                }
            }
            b"TXXX" => {
                if let Some((desc, value)) = decode_txxx(body) {
                    if desc.contains("StreamTitle") || desc.contains("TITLE") {
                        apply_combined(&mut result, &value);
                    }
                }
            }
            b"PRIV" => {
                if let Some(combined) = stream_title_in_priv(body) {
                    apply_combined(&mut result, &combined);
                }
            }
            _ => {}
        }

        pos += 10 + frame_size;
    }

    Some(result)
}

fn apply_combined(result: &mut InlineId3, combined: &str) {
    let combined = combined.trim();
    if combined.is_empty() {
        return;
    }
    let (artist, title) = split_artist_title(combined);
    if artist.is_some() {
        result.artist = artist;
    }
    result.title = Some(title);
}

fn syncsafe_u32(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32 & 0x7f) << 21)
        | ((bytes[1] as u32 & 0x7f) << 14)
        | ((bytes[2] as u32 & 0x7f) << 7)
        | (bytes[3] as u32 & 0x7f)
}

/// Decodes a text frame body: one encoding byte followed by the text.
fn decode_text_frame(body: &[u8]) -> Option<String> {
    if body.len() < 2 {
        return None;
    }
    let text = decode_encoded(body[0], &body[1..])?;
    let text = text.trim_end_matches('\0').trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Decodes a TXXX body into `(description, value)`.
fn decode_txxx(body: &[u8]) -> Option<(String, String)> {
    if body.len() < 2 {
        return None;
    }
    let encoding = body[0];
    let rest = &body[1..];

    // The description/value split is at an encoding-dependent terminator.
    let (desc_bytes, value_bytes) = if matches!(encoding, 1 | 2) {
        let term = rest
            .chunks_exact(2)
            .position(|pair| pair == [0, 0])
            .map(|i| i * 2)?;
        (&rest[..term], rest.get(term + 2..)?)
    } else {
        let term = rest.iter().position(|b| *b == 0)?;
        (&rest[..term], rest.get(term + 1..)?)
    };

    let desc = decode_encoded(encoding, desc_bytes)?;
    let value = decode_encoded(encoding, value_bytes)?;
    Some((desc, value.trim_end_matches('\0').trim().to_string()))
}

/// Finds `StreamTitle='...'` inside a PRIV frame payload.
fn stream_title_in_priv(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let start = text.find("StreamTitle='")? + "StreamTitle='".len();
    let rest = &text[start..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

/// Decodes frame text for the four ID3v2 encodings.
///
/// 0 = ISO-8859-1, 1 = UTF-16 with BOM (LE assumed when absent),
/// 2 = UTF-16BE, 3 = UTF-8. Undecodable sequences are dropped rather than
/// failing the whole frame.
fn decode_encoded(encoding: u8, bytes: &[u8]) -> Option<String> {
    match encoding {
        0 => Some(bytes.iter().map(|&b| b as char).collect()),
        1 => {
            if bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xfe {
                Some(utf16_string(&bytes[2..], false))
            } else if bytes.len() >= 2 && bytes[0] == 0xfe && bytes[1] == 0xff {
                Some(utf16_string(&bytes[2..], true))
            } else {
                Some(utf16_string(bytes, false))
            }
        }
        2 => Some(utf16_string(bytes, true)),
        3 => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn utf16_string(bytes: &[u8], big_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &[u8; 4], body: &[u8], v4: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(id);
        let size = body.len() as u32;
        if v4 {
            out.extend_from_slice(&[
                ((size >> 21) & 0x7f) as u8,
                ((size >> 14) & 0x7f) as u8,
                ((size >> 7) & 0x7f) as u8,
                (size & 0x7f) as u8,
            ]);
        } else {
            out.extend_from_slice(&size.to_be_bytes());
        }
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(body);
        out
    }

    fn tag(version: u8, frames: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = frames.concat();
        let size = body.len() as u32;
        let mut out = vec![
            b'I',
            b'D',
            b'3',
            version,
            0,
            0,
            ((size >> 21) & 0x7f) as u8,
            ((size >> 14) & 0x7f) as u8,
            ((size >> 7) & 0x7f) as u8,
            (size & 0x7f) as u8,
        ];
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn parses_v3_title_and_artist() {
        let mut title = vec![0u8]; // ISO-8859-1
        title.extend_from_slice(b"Hello");
        let mut artist = vec![3u8]; // UTF-8
        artist.extend_from_slice("Wörld".as_bytes());

        let data = tag(3, &[frame(b"TIT2", &title, false), frame(b"TPE1", &artist, false)]);
        let parsed = parse_inline(&data).unwrap();

        assert_eq!(parsed.title.as_deref(), Some("Hello"));
        assert_eq!(parsed.artist.as_deref(), Some("Wörld"));
        assert_eq!(parsed.tag_len, data.len());
    }

    #[test]
    fn parses_v4_syncsafe_frame_sizes() {
        let mut title = vec![3u8];
        title.extend_from_slice(b"Track");
        let data = tag(4, &[frame(b"TIT2", &title, true)]);

        let parsed = parse_inline(&data).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Track"));
    }

    #[test]
    fn utf16_le_with_bom() {
        let mut body = vec![1u8, 0xff, 0xfe];
        for unit in "Héllo".encode_utf16() {
            body.extend_from_slice(&unit.to_le_bytes());
        }
        let data = tag(3, &[frame(b"TIT2", &body, false)]);
        assert_eq!(parse_inline(&data).unwrap().title.as_deref(), Some("Héllo"));
    }

    #[test]
    fn utf16_be_without_bom() {
        let mut body = vec![2u8];
        for unit in "Oslo".encode_utf16() {
            body.extend_from_slice(&unit.to_be_bytes());
        }
        let data = tag(4, &[frame(b"TIT2", &body, true)]);
        assert_eq!(parse_inline(&data).unwrap().title.as_deref(), Some("Oslo"));
    }

    #[test]
    fn txxx_stream_title_splits_artist() {
        let mut body = vec![0u8];
        body.extend_from_slice(b"StreamTitle\0Artist - Song");
        let data = tag(3, &[frame(b"TXXX", &body, false)]);

        let parsed = parse_inline(&data).unwrap();
        assert_eq!(parsed.artist.as_deref(), Some("Artist"));
        assert_eq!(parsed.title.as_deref(), Some("Song"));
    }

    #[test]
    fn priv_stream_title_is_recovered() {
        let body = b"com.example.meta\0StreamTitle='Duo - Tune';".to_vec();
        let data = tag(3, &[frame(b"PRIV", &body, false)]);

        let parsed = parse_inline(&data).unwrap();
        assert_eq!(parsed.artist.as_deref(), Some("Duo"));
        assert_eq!(parsed.title.as_deref(), Some("Tune"));
    }

    #[test]
    fn non_id3_data_is_none() {
        assert_eq!(parse_inline(&[0x47, 0x40, 0x00]), None);
        assert_eq!(parse_inline(b"ID3"), None);
    }

    #[test]
    fn truncated_tag_is_none() {
        let mut title = vec![0u8];
        title.extend_from_slice(b"Hello");
        let mut data = tag(3, &[frame(b"TIT2", &title, false)]);
        data.truncate(data.len() - 4);
        assert_eq!(parse_inline(&data), None);
    }
}
