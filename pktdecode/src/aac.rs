//! Raw AAC (ADTS) file decoding.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use tracing::debug;

use crate::{aacstream::AacStreamDecoder, adts, AudioFormat, DecodeError, DecoderInfo, PendingPcm};

/// File read granularity.
const READ_CHUNK: usize = 32 * 1024;

/// Frames scanned at open to estimate the mean ADTS frame length.
const SCAN_FRAMES: usize = 64;

pub struct AdtsFileDecoder {
    file: File,
    file_size: u64,
    aac: AacStreamDecoder,
    info: DecoderInfo,
    read_buf: Vec<u8>,
    pending: PendingPcm,
    position: u64,
    eof: bool,
}

impl AdtsFileDecoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        // Probe the head: find sync, read stream parameters, measure the
        // mean frame length for the duration estimate.
        let mut probe = vec![0u8; READ_CHUNK.min(file_size as usize)];
        file.read_exact(&mut probe)?;

        let first_sync = adts::find_sync(&probe, 0)
            .ok_or_else(|| DecodeError::Container("no ADTS sync word found".into()))?;
        let header = adts::parse_header(&probe[first_sync..])
            .ok_or_else(|| DecodeError::Container("unreadable ADTS header".into()))?;

        let (frames_scanned, bytes_scanned) = scan_frames(&probe[first_sync..], SCAN_FRAMES);
        let total_frames = if frames_scanned > 0 {
            let mean_len = bytes_scanned as u64 / frames_scanned as u64;
            (file_size - first_sync as u64) / mean_len.max(1) * 1024
        } else {
            0
        };

        debug!(
            sample_rate = header.sample_rate,
            channels = header.channels,
            total_frames,
            "ADTS stream opened"
        );

        file.seek(SeekFrom::Start(first_sync as u64))?;

        Ok(Self {
            file,
            file_size,
            aac: AacStreamDecoder::new(),
            info: DecoderInfo {
                format: AudioFormat::Aac,
                sample_rate: header.sample_rate,
                channels: header.channels.min(2),
                total_frames,
            },
            read_buf: vec![0u8; READ_CHUNK],
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
            let read = self.file.read(&mut self.read_buf)?;
            if read == 0 {
                self.eof = true;
                break;
            }

            let pending = &mut self.pending;
            let chunk = &self.read_buf[..read];
            self.aac.push(chunk, |pcm, channels, _rate| {
                pending.push_interleaved(pcm, channels as usize);
            })?;

            written += self.pending.drain_into(&mut out[written * 2..]);
        }

        self.position += written as u64;
        Ok(written)
    }

    /// Byte-ratio seek, re-synced to the next ADTS frame boundary before
    /// any data reaches the decoder.
    pub fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        if self.info.total_frames == 0 && frame > 0 {
            return Ok(());
        }
        let clamped = frame.min(self.info.total_frames);
        let byte = if self.info.total_frames > 0 {
            self.file_size * clamped / self.info.total_frames
        } else {
            0
        };

        self.file.seek(SeekFrom::Start(byte))?;
        let mut probe = vec![0u8; READ_CHUNK.min((self.file_size - byte) as usize)];
        let got = self.file.read(&mut probe)?;
        probe.truncate(got);

        let sync = adts::find_sync(&probe, 0).unwrap_or(0);
        self.file.seek(SeekFrom::Start(byte + sync as u64))?;

        self.aac.reset();
        self.pending.clear();
        self.eof = false;
        self.position = clamped;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.pending.is_empty()
    }
}

/// Walks up to `max` ADTS frames; returns (frames, bytes) covered.
fn scan_frames(data: &[u8], max: usize) -> (usize, usize) {
    let mut frames = 0;
    let mut pos = 0;
    while frames < max {
        match adts::parse_header(&data[pos..]) {
            Some(header) if pos + header.frame_len <= data.len() => {
                pos += header.frame_len;
                frames += 1;
            }
            _ => break,
        }
    }
    (frames, pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_scan_counts_back_to_back_frames() {
        let mut data = Vec::new();
        for _ in 0..10 {
            data.extend_from_slice(&adts::build_header(2, 4, 2, 93));
            data.extend_from_slice(&[0u8; 93]);
        }
        let (frames, bytes) = scan_frames(&data, 64);
        assert_eq!(frames, 10);
        assert_eq!(bytes, 10 * 100);
    }

    #[test]
    fn open_rejects_files_without_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.aac");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
        assert!(AdtsFileDecoder::open(&path).is_err());
    }
}
