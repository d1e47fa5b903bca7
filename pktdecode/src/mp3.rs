//! MP3 decoding via minimp3.
//!
//! minimp3 resynchronises on frame sync words by itself, which makes the
//! byte-ratio seek safe: land anywhere in the file and the next decoded
//! frame starts at the following sync.

use std::{
    fs::File,
    io::{Seek, SeekFrom},
    path::{Path, PathBuf},
};

use minimp3::{Decoder as MiniMp3Decoder, Error as MiniMp3Error};
use tracing::debug;

use crate::{AudioFormat, DecodeError, DecoderInfo, PendingPcm};

pub struct Mp3Decoder {
    path: PathBuf,
    decoder: MiniMp3Decoder<File>,
    info: DecoderInfo,
    pending: PendingPcm,
    channels: usize,
    position: u64,
    eof: bool,
    file_size: u64,
}

impl Mp3Decoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut decoder = MiniMp3Decoder::new(file);

        // Decode the first frame to learn the stream parameters; its PCM is
        // kept so playback starts at sample zero.
        let frame = loop {
            match decoder.next_frame() {
                Ok(frame) if frame.channels > 0 => break frame,
                Ok(_) => continue,
                Err(MiniMp3Error::InsufficientData) | Err(MiniMp3Error::SkippedData) => continue,
                Err(MiniMp3Error::Eof) => {
                    return Err(DecodeError::Container(
                        "no decodable MP3 frames in file".into(),
                    ))
                }
                Err(MiniMp3Error::Io(err)) => return Err(DecodeError::Io(err)),
            }
        };

        let sample_rate = frame.sample_rate as u32;
        let channels = frame.channels;
        // CBR estimate from the first frame; VBR files land near enough for
        // a progress bar and the seek ratio.
        let total_frames = if frame.bitrate > 0 {
            file_size * 8 / (frame.bitrate as u64 * 1000) * sample_rate as u64
        } else {
            0
        };

        let mut pending = PendingPcm::default();
        pending.push_interleaved(&frame.data, channels);

        debug!(
            sample_rate,
            channels,
            bitrate_kbps = frame.bitrate,
            total_frames,
            "MP3 stream opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            info: DecoderInfo {
                format: AudioFormat::Mp3,
                sample_rate,
                channels: channels.min(2) as u8,
                total_frames,
            },
            pending,
            channels,
            position: 0,
            eof: false,
            file_size,
        })
    }

    pub fn info(&self) -> DecoderInfo {
        self.info
    }

    pub fn read(&mut self, out: &mut [i16]) -> Result<usize, DecodeError> {
        let want_frames = out.len() / 2;
        let mut written = self.pending.drain_into(out);

        while written < want_frames && !self.eof {
            match self.decoder.next_frame() {
                Ok(frame) => {
                    if frame.channels == 0 {
                        continue;
                    }
                    self.pending.push_interleaved(&frame.data, frame.channels);
                    written += self.pending.drain_into(&mut out[written * 2..]);
                }
                Err(MiniMp3Error::InsufficientData) | Err(MiniMp3Error::SkippedData) => continue,
                Err(MiniMp3Error::Eof) => self.eof = true,
                Err(MiniMp3Error::Io(err)) => return Err(DecodeError::Io(err)),
            }
        }

        self.position += written as u64;
        Ok(written)
    }

    /// Byte-ratio seek: position the file at `frame / total` of its size and
    /// let minimp3 resync. Exact for frame zero, approximate elsewhere.
    pub fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        if self.info.total_frames == 0 && frame > 0 {
            return Ok(()); // unseekable without a duration
        }

        let byte = if frame == 0 || self.info.total_frames == 0 {
            0
        } else {
            let clamped = frame.min(self.info.total_frames);
            self.file_size * clamped / self.info.total_frames
        };

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(byte))?;
        self.decoder = MiniMp3Decoder::new(file);
        self.pending.clear();
        self.eof = false;
        self.position = frame.min(self.info.total_frames);
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.pending.is_empty()
    }

    /// Source channel count before the stereo upmix.
    pub fn source_channels(&self) -> usize {
        self.channels
    }
}
