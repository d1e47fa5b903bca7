//! Incremental ICY body demultiplexer.
//!
//! The body alternates `icy-metaint` audio bytes with one length byte and
//! `length * 16` metadata bytes. Network chunks land at arbitrary
//! boundaries, so the demux keeps its position across pushes.

use pktmeta::icy::{parse_stream_title, IcyTitle, MAX_METADATA_LEN};
use tracing::{trace, warn};

enum DemuxState {
    /// Plain audio until the next metadata block.
    Audio { remaining: usize },
    /// Waiting for the single length byte.
    Length,
    /// Collecting a metadata block.
    Metadata { needed: usize, buf: Vec<u8> },
}

pub struct IcyDemux {
    metaint: usize,
    state: DemuxState,
}

impl IcyDemux {
    /// `metaint = 0` disables metadata splitting: the body is pure audio.
    pub fn new(metaint: usize) -> Self {
        let state = if metaint == 0 {
            DemuxState::Audio { remaining: usize::MAX }
        } else {
            DemuxState::Audio { remaining: metaint }
        };
        Self { metaint, state }
    }

    /// Consumes one network chunk. Audio bytes are appended to `audio`;
    /// every complete, parseable `StreamTitle` found is returned.
    pub fn push(&mut self, mut data: &[u8], audio: &mut Vec<u8>) -> Vec<IcyTitle> {
        let mut titles = Vec::new();

        while !data.is_empty() {
            match &mut self.state {
                DemuxState::Audio { remaining } => {
                    let take = (*remaining).min(data.len());
                    audio.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if *remaining != usize::MAX {
                        *remaining -= take;
                        if *remaining == 0 {
                            self.state = DemuxState::Length;
                        }
                    }
                }
                DemuxState::Length => {
                    let len = data[0] as usize * 16;
                    data = &data[1..];
                    if len == 0 {
                        self.state = DemuxState::Audio { remaining: self.metaint };
                    } else if len > MAX_METADATA_LEN {
                        // Cannot happen from a single length byte, but keep
                        // the guard in case the framing drifted.
                        warn!(len, "discarding oversized ICY metadata block");
                        self.state = DemuxState::Metadata { needed: len, buf: Vec::new() };
                    } else {
                        self.state = DemuxState::Metadata {
                            needed: len,
                            buf: Vec::with_capacity(len),
                        };
                    }
                }
                DemuxState::Metadata { needed, buf } => {
                    let take = (*needed - buf.len()).min(data.len());
                    buf.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if buf.len() == *needed {
                        if let Some(title) = parse_stream_title(buf) {
                            trace!(?title, "ICY metadata block parsed");
                            titles.push(title);
                        }
                        self.state = DemuxState::Audio { remaining: self.metaint };
                    }
                }
            }
        }

        titles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_block(text: &str) -> Vec<u8> {
        let body = format!("StreamTitle='{text}';");
        let padded_len = body.len().div_ceil(16);
        let mut block = vec![padded_len as u8];
        block.extend_from_slice(body.as_bytes());
        block.resize(1 + padded_len * 16, 0);
        block
    }

    #[test]
    fn splits_audio_and_metadata() {
        let mut demux = IcyDemux::new(8);
        let mut stream = vec![1u8; 8];
        stream.extend_from_slice(&meta_block("A - B"));
        stream.extend_from_slice(&[2u8; 8]);

        let mut audio = Vec::new();
        let titles = demux.push(&stream, &mut audio);

        assert_eq!(audio, [vec![1u8; 8], vec![2u8; 8]].concat());
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].artist.as_deref(), Some("A"));
        assert_eq!(titles[0].title, "B");
    }

    #[test]
    fn zero_length_byte_is_just_audio_framing() {
        let mut demux = IcyDemux::new(4);
        let stream = [9u8, 9, 9, 9, 0, 7, 7, 7, 7];

        let mut audio = Vec::new();
        let titles = demux.push(&stream, &mut audio);
        assert!(titles.is_empty());
        assert_eq!(audio, [9, 9, 9, 9, 7, 7, 7, 7]);
    }

    #[test]
    fn handles_arbitrary_chunk_boundaries() {
        let mut demux = IcyDemux::new(8);
        let mut stream = vec![1u8; 8];
        stream.extend_from_slice(&meta_block("Artist - Song"));
        stream.extend_from_slice(&[2u8; 8]);

        let mut audio = Vec::new();
        let mut titles = Vec::new();
        for byte in stream {
            titles.extend(demux.push(&[byte], &mut audio));
        }

        assert_eq!(audio.len(), 16);
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].title, "Song");
    }

    #[test]
    fn metaint_zero_passes_everything_as_audio() {
        let mut demux = IcyDemux::new(0);
        let mut audio = Vec::new();
        let titles = demux.push(&[1, 2, 3, 0, 4, 5], &mut audio);
        assert!(titles.is_empty());
        assert_eq!(audio, [1, 2, 3, 0, 4, 5]);
    }
}
