//! # pktdecode
//!
//! Stream decoders for local playback. Every supported format is decoded to
//! the same shape: interleaved signed 16-bit stereo PCM, pulled by the decode
//! thread through a uniform read/seek contract.
//!
//! ## Architecture
//!
//! [`StreamDecoder`] is a tagged enum with one variant per container/codec
//! pair. Each variant owns its codec state plus a pending buffer of decoded
//! stereo samples; frame-oriented codecs decode whole frames into that buffer
//! and `read` drains it, so a caller asking for fewer frames than one AAC
//! frame produces simply leaves the remainder for the next call. `seek`
//! clears the pending buffer along with any codec transport state.
//!
//! Codec crates per format:
//!
//! | Format | Container | Codec |
//! |--------|-----------|-------|
//! | MP3    | —         | minimp3 |
//! | WAV    | RIFF (hand-parsed) | PCM 8/16/24/32 |
//! | FLAC   | —         | claxon |
//! | OGG    | Ogg       | lewton |
//! | Opus   | Ogg (hand-parsed pages) | opus |
//! | M4A    | MP4 (hand-parsed sample tables) | fdk-aac |
//! | AAC    | ADTS      | fdk-aac |
//!
//! ## Example
//!
//! ```no_run
//! use pktdecode::StreamDecoder;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), pktdecode::DecodeError> {
//! let mut decoder = StreamDecoder::open(Path::new("song.flac"))?;
//! let mut pcm = vec![0i16; 2048 * 2];
//! loop {
//!     let frames = decoder.read(&mut pcm)?;
//!     if frames == 0 {
//!         break;
//!     }
//!     // frames * 2 samples of interleaved stereo in pcm[..]
//! }
//! # Ok(())
//! # }
//! ```

use std::{collections::VecDeque, path::Path};

pub mod adts;
pub mod common;
mod aac;
mod aacstream;
mod flac;
mod m4a;
mod mp3;
mod ogg;
mod oggpage;
mod opusdec;
mod probe;
mod wav;

pub use aac::AdtsFileDecoder;
pub use aacstream::AacStreamDecoder;
pub use flac::FlacDecoder;
pub use m4a::M4aDecoder;
pub use mp3::Mp3Decoder;
pub use ogg::VorbisDecoder;
pub use opusdec::OpusFileDecoder;
pub use probe::{format_from_content_type, format_from_extension};
pub use wav::WavDecoder;

/// Format tag assigned by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Flac,
    Ogg,
    Opus,
    M4a,
    Aac,
}

/// Errors raised by the decoders.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown or unsupported audio format: {0}")]
    UnknownFormat(String),
    #[error("malformed container: {0}")]
    Container(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("output buffer must hold whole stereo frames")]
    BadBuffer,
}

impl From<claxon::Error> for DecodeError {
    fn from(err: claxon::Error) -> Self {
        DecodeError::Codec(err.to_string())
    }
}

impl From<lewton::VorbisError> for DecodeError {
    fn from(err: lewton::VorbisError) -> Self {
        DecodeError::Codec(err.to_string())
    }
}

impl From<opus::Error> for DecodeError {
    fn from(err: opus::Error) -> Self {
        DecodeError::Codec(err.to_string())
    }
}

/// Published stream parameters, fixed at `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderInfo {
    pub format: AudioFormat,
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Source channel count (1 or 2); output is always stereo.
    pub channels: u8,
    /// Total PCM frames, 0 when unknown (live or unparseable).
    pub total_frames: u64,
}

impl DecoderInfo {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.total_frames * 1000 / self.sample_rate as u64
    }
}

/// A format-specific decoder behind the shared contract.
pub enum StreamDecoder {
    Mp3(Mp3Decoder),
    Wav(WavDecoder),
    Flac(FlacDecoder),
    Ogg(VorbisDecoder),
    Opus(OpusFileDecoder),
    M4a(M4aDecoder),
    Aac(AdtsFileDecoder),
}

impl StreamDecoder {
    /// Probes the extension and opens the matching decoder.
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let format = format_from_extension(path).ok_or_else(|| {
            DecodeError::UnknownFormat(path.to_string_lossy().into_owned())
        })?;
        Self::open_as(path, format)
    }

    /// Opens `path` with an explicit format tag.
    pub fn open_as(path: &Path, format: AudioFormat) -> Result<Self, DecodeError> {
        tracing::debug!(path = %path.display(), ?format, "opening decoder");
        Ok(match format {
            AudioFormat::Mp3 => Self::Mp3(Mp3Decoder::open(path)?),
            AudioFormat::Wav => Self::Wav(WavDecoder::open(path)?),
            AudioFormat::Flac => Self::Flac(FlacDecoder::open(path)?),
            AudioFormat::Ogg => Self::Ogg(VorbisDecoder::open(path)?),
            AudioFormat::Opus => Self::Opus(OpusFileDecoder::open(path)?),
            AudioFormat::M4a => Self::M4a(M4aDecoder::open(path)?),
            AudioFormat::Aac => Self::Aac(AdtsFileDecoder::open(path)?),
        })
    }

    pub fn info(&self) -> DecoderInfo {
        match self {
            Self::Mp3(d) => d.info(),
            Self::Wav(d) => d.info(),
            Self::Flac(d) => d.info(),
            Self::Ogg(d) => d.info(),
            Self::Opus(d) => d.info(),
            Self::M4a(d) => d.info(),
            Self::Aac(d) => d.info(),
        }
    }

    /// Decodes up to `out.len() / 2` stereo frames into `out`.
    ///
    /// Returns the number of frames written. A short read does not imply
    /// EOF; zero frames together with [`Self::is_eof`] does.
    pub fn read(&mut self, out: &mut [i16]) -> Result<usize, DecodeError> {
        if out.len() % 2 != 0 {
            return Err(DecodeError::BadBuffer);
        }
        match self {
            Self::Mp3(d) => d.read(out),
            Self::Wav(d) => d.read(out),
            Self::Flac(d) => d.read(out),
            Self::Ogg(d) => d.read(out),
            Self::Opus(d) => d.read(out),
            Self::M4a(d) => d.read(out),
            Self::Aac(d) => d.read(out),
        }
    }

    /// Best-effort seek to an absolute PCM frame.
    pub fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        match self {
            Self::Mp3(d) => d.seek(frame),
            Self::Wav(d) => d.seek(frame),
            Self::Flac(d) => d.seek(frame),
            Self::Ogg(d) => d.seek(frame),
            Self::Opus(d) => d.seek(frame),
            Self::M4a(d) => d.seek(frame),
            Self::Aac(d) => d.seek(frame),
        }
    }

    /// Current PCM frame cursor (frames handed out so far, adjusted by seeks).
    pub fn position(&self) -> u64 {
        match self {
            Self::Mp3(d) => d.position(),
            Self::Wav(d) => d.position(),
            Self::Flac(d) => d.position(),
            Self::Ogg(d) => d.position(),
            Self::Opus(d) => d.position(),
            Self::M4a(d) => d.position(),
            Self::Aac(d) => d.position(),
        }
    }

    pub fn is_eof(&self) -> bool {
        match self {
            Self::Mp3(d) => d.is_eof(),
            Self::Wav(d) => d.is_eof(),
            Self::Flac(d) => d.is_eof(),
            Self::Ogg(d) => d.is_eof(),
            Self::Opus(d) => d.is_eof(),
            Self::M4a(d) => d.is_eof(),
            Self::Aac(d) => d.is_eof(),
        }
    }
}

/// Pending buffer of decoded stereo samples shared by all decoders.
///
/// Decoders push whole decoded frames here; `read` drains caller-sized
/// prefixes. This is the leftover mechanism the frame-oriented codecs need
/// and a plain FIFO for everything else.
#[derive(Debug, Default)]
pub(crate) struct PendingPcm {
    samples: VecDeque<i16>,
}

impl PendingPcm {
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Queues interleaved samples, duplicating mono into both channels.
    pub fn push_interleaved(&mut self, samples: &[i16], channels: usize) {
        match channels {
            1 => {
                for &s in samples {
                    self.samples.push_back(s);
                    self.samples.push_back(s);
                }
            }
            _ => {
                // Channels beyond the first two are dropped.
                for frame in samples.chunks(channels.max(1)) {
                    let l = frame.first().copied().unwrap_or(0);
                    let r = frame.get(1).copied().unwrap_or(l);
                    self.samples.push_back(l);
                    self.samples.push_back(r);
                }
            }
        }
    }

    /// Drops the first `frames` stereo frames (used after coarse seeks).
    pub fn skip_frames(&mut self, frames: usize) {
        let n = (frames * 2).min(self.samples.len());
        self.samples.drain(..n);
    }

    /// Moves as many whole frames as fit into `out`; returns frames moved.
    pub fn drain_into(&mut self, out: &mut [i16]) -> usize {
        let frames = (out.len() / 2).min(self.samples.len() / 2);
        for slot in out.iter_mut().take(frames * 2) {
            *slot = self.samples.pop_front().unwrap_or(0);
        }
        frames
    }
}
