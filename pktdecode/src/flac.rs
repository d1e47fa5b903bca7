//! FLAC decoding via claxon.
//!
//! claxon has no native seeking, so `seek` reopens the reader and
//! decode-skips to the target block. Exact, and fast enough for the seek
//! distances a handheld UI produces.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{AudioFormat, DecodeError, DecoderInfo, PendingPcm};

pub struct FlacDecoder {
    path: PathBuf,
    reader: claxon::FlacReader<BufReader<File>>,
    info: DecoderInfo,
    bits_per_sample: u32,
    /// Buffer recycled between claxon blocks.
    block_buffer: Vec<i32>,
    pending: PendingPcm,
    position: u64,
    eof: bool,
}

impl FlacDecoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let reader = claxon::FlacReader::new(BufReader::new(File::open(path)?))?;
        let streaminfo = reader.streaminfo();

        debug!(
            sample_rate = streaminfo.sample_rate,
            channels = streaminfo.channels,
            bits = streaminfo.bits_per_sample,
            samples = ?streaminfo.samples,
            "FLAC stream opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            info: DecoderInfo {
                format: AudioFormat::Flac,
                sample_rate: streaminfo.sample_rate,
                channels: streaminfo.channels.min(2) as u8,
                total_frames: streaminfo.samples.unwrap_or(0),
            },
            bits_per_sample: streaminfo.bits_per_sample,
            reader,
            block_buffer: Vec::new(),
            pending: PendingPcm::default(),
            position: 0,
            eof: false,
        })
    }

    pub fn info(&self) -> DecoderInfo {
        self.info
    }

    pub fn read(&mut self, out: &mut [i16]) -> Result<usize, DecodeError> {
        let want_frames = out.len() / 2;
        let mut written = self.pending.drain_into(out);

        while written < want_frames && !self.eof {
            match self.decode_block()? {
                Some(_) => written += self.pending.drain_into(&mut out[written * 2..]),
                None => self.eof = true,
            }
        }

        self.position += written as u64;
        Ok(written)
    }

    /// Exact seek by reopening the stream and decode-skipping to `frame`.
    pub fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        let target = if self.info.total_frames > 0 {
            frame.min(self.info.total_frames)
        } else {
            frame
        };

        self.reader = claxon::FlacReader::new(BufReader::new(File::open(&self.path)?))?;
        self.pending.clear();
        self.eof = false;

        let mut skipped = 0u64;
        while skipped < target {
            match self.decode_block()? {
                Some(frames) => {
                    let frames = frames as u64;
                    if skipped + frames <= target {
                        self.pending.clear();
                        skipped += frames;
                    } else {
                        self.pending.skip_frames((target - skipped) as usize);
                        skipped = target;
                    }
                }
                None => {
                    self.eof = true;
                    break;
                }
            }
        }

        self.position = skipped;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.pending.is_empty()
    }

    /// Decodes the next block into the pending buffer.
    ///
    /// Returns the block length in frames, or `None` at end of stream.
    fn decode_block(&mut self) -> Result<Option<usize>, DecodeError> {
        let buffer = std::mem::take(&mut self.block_buffer);
        let mut blocks = self.reader.blocks();
        match blocks.read_next_or_eof(buffer) {
            Ok(Some(block)) => {
                let frames = block.duration() as usize;
                let channels = block.channels() as usize;

                let mut interleaved = Vec::with_capacity(frames * channels);
                for frame_idx in 0..frames {
                    for channel_idx in 0..channels {
                        let sample = block.sample(channel_idx as u32, frame_idx as u32);
                        interleaved.push(scale_to_i16(sample, self.bits_per_sample));
                    }
                }
                self.block_buffer = block.into_buffer();

                self.pending.push_interleaved(&interleaved, channels);
                Ok(Some(frames))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(DecodeError::from(err)),
        }
    }
}

/// Scales a decoded sample of `bits` precision to i16.
fn scale_to_i16(sample: i32, bits: u32) -> i16 {
    if bits == 16 {
        sample as i16
    } else if bits < 16 {
        (sample << (16 - bits)) as i16
    } else {
        (sample >> (bits - 16)) as i16
    }
}
