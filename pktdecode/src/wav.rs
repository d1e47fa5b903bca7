//! WAV (RIFF PCM) decoding.
//!
//! The container is simple enough to parse directly: walk the chunks, pick
//! up `fmt `, then serve samples straight out of `data`. Seeks are exact
//! since every frame has a fixed size.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use tracing::debug;

use crate::{AudioFormat, DecodeError, DecoderInfo, PendingPcm};

struct FmtChunk {
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

impl FmtChunk {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.audio_format != 0x0001 {
            return Err(DecodeError::Container(format!(
                "unsupported WAV audio format: {}",
                self.audio_format
            )));
        }
        if self.channels == 0 || self.sample_rate == 0 {
            return Err(DecodeError::Container("WAV fmt chunk is degenerate".into()));
        }
        match self.bits_per_sample {
            8 | 16 | 24 | 32 => Ok(()),
            other => Err(DecodeError::Container(format!(
                "unsupported PCM bit depth: {other}"
            ))),
        }
    }

    fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize + 7) / 8
    }

    fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }
}

pub struct WavDecoder {
    file: File,
    fmt: FmtChunk,
    info: DecoderInfo,
    data_start: u64,
    pending: PendingPcm,
    /// Source frames consumed from the data chunk.
    source_frames: u64,
    position: u64,
    eof: bool,
}

impl WavDecoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let mut file = File::open(path)?;

        let mut riff = [0u8; 12];
        file.read_exact(&mut riff)?;
        if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
            return Err(DecodeError::Container("missing RIFF/WAVE header".into()));
        }

        let mut fmt: Option<FmtChunk> = None;
        let (data_start, data_len) = loop {
            let mut header = [0u8; 8];
            file.read_exact(&mut header).map_err(|_| {
                DecodeError::Container("WAV file has no data chunk".into())
            })?;
            let chunk_size =
                u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
            let padded = (chunk_size + 1) & !1;

            match &header[0..4] {
                b"fmt " => {
                    if chunk_size < 16 {
                        return Err(DecodeError::Container("fmt chunk too small".into()));
                    }
                    let mut bytes = vec![0u8; chunk_size as usize];
                    file.read_exact(&mut bytes)?;
                    let parsed = FmtChunk {
                        audio_format: u16::from_le_bytes([bytes[0], bytes[1]]),
                        channels: u16::from_le_bytes([bytes[2], bytes[3]]),
                        sample_rate: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
                        bits_per_sample: u16::from_le_bytes([bytes[14], bytes[15]]),
                    };
                    parsed.validate()?;
                    fmt = Some(parsed);
                    if padded > chunk_size {
                        file.seek(SeekFrom::Current((padded - chunk_size) as i64))?;
                    }
                }
                b"data" => {
                    let start = file.stream_position()?;
                    break (start, chunk_size);
                }
                _ => {
                    file.seek(SeekFrom::Current(padded as i64))?;
                }
            }
        };

        let fmt = fmt.ok_or_else(|| DecodeError::Container("data chunk before fmt chunk".into()))?;
        let total_frames = data_len / fmt.bytes_per_frame() as u64;

        debug!(
            sample_rate = fmt.sample_rate,
            channels = fmt.channels,
            bits = fmt.bits_per_sample,
            total_frames,
            "WAV stream opened"
        );

        let info = DecoderInfo {
            format: AudioFormat::Wav,
            sample_rate: fmt.sample_rate,
            channels: fmt.channels.min(2) as u8,
            total_frames,
        };

        Ok(Self {
            file,
            fmt,
            info,
            data_start,
            pending: PendingPcm::default(),
            source_frames: 0,
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
            let remaining = self.info.total_frames.saturating_sub(self.source_frames);
            if remaining == 0 {
                self.eof = true;
                break;
            }

            let batch = (want_frames - written).min(remaining as usize).min(4096);
            let mut raw = vec![0u8; batch * self.fmt.bytes_per_frame()];
            self.file.read_exact(&mut raw)?;
            self.source_frames += batch as u64;

            let samples = decode_pcm(&raw, self.fmt.bits_per_sample);
            self.pending
                .push_interleaved(&samples, self.fmt.channels as usize);
            written += self.pending.drain_into(&mut out[written * 2..]);
        }

        self.position += written as u64;
        Ok(written)
    }

    pub fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        let frame = frame.min(self.info.total_frames);
        let offset = self.data_start + frame * self.fmt.bytes_per_frame() as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.pending.clear();
        self.source_frames = frame;
        self.eof = false;
        self.position = frame;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.pending.is_empty()
    }
}

/// Converts little-endian PCM of the given depth to i16.
fn decode_pcm(raw: &[u8], bits: u16) -> Vec<i16> {
    match bits {
        8 => raw
            .iter()
            .map(|&b| ((b as i16) - 128) << 8)
            .collect(),
        16 => raw
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect(),
        24 => raw
            .chunks_exact(3)
            .map(|c| {
                let v = ((c[2] as i32) << 16) | ((c[1] as i32) << 8) | (c[0] as i32);
                let v = (v << 8) >> 8; // sign extend
                (v >> 8) as i16
            })
            .collect(),
        32 => raw
            .chunks_exact(4)
            .map(|c| (i32::from_le_bytes([c[0], c[1], c[2], c[3]]) >> 16) as i16)
            .collect(),
        _ => Vec::new(),
    }
}
