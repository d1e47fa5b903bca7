//! Ogg/Opus decoding: hand-parsed Ogg pages feeding the `opus` codec.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use opus::{Channels, Decoder as OpusDecoder};
use tracing::debug;

use crate::{
    oggpage::{last_granule_position, OggPageReader},
    AudioFormat, DecodeError, DecoderInfo, PendingPcm,
};

/// Opus always decodes at 48 kHz.
const OPUS_RATE: u32 = 48_000;

/// Largest possible Opus frame: 120 ms at 48 kHz.
const MAX_FRAME_SAMPLES: usize = 5760;

/// Parsed OpusHead metadata.
struct OpusHead {
    channels: u8,
    pre_skip: u16,
    output_gain: i16,
}

impl OpusHead {
    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 19 || &data[0..8] != b"OpusHead" {
            return Err(DecodeError::Container("missing OpusHead packet".into()));
        }
        Ok(Self {
            channels: data[9],
            pre_skip: u16::from_le_bytes([data[10], data[11]]),
            output_gain: i16::from_le_bytes([data[16], data[17]]),
        })
    }
}

pub struct OpusFileDecoder {
    path: PathBuf,
    packets: OggPageReader<BufReader<File>>,
    decoder: OpusDecoder,
    info: DecoderInfo,
    channels: usize,
    pre_skip: u16,
    /// Pre-skip samples still to drop from the decoder output.
    skip_remaining: usize,
    pcm_buf: Vec<i16>,
    pending: PendingPcm,
    position: u64,
    eof: bool,
}

impl OpusFileDecoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let (packets, head) = Self::open_packets(path)?;
        let channels = head.channels as usize;

        let channels_enum = match head.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => {
                return Err(DecodeError::Container(format!(
                    "unsupported Opus channel count: {other}"
                )))
            }
        };
        let mut decoder = OpusDecoder::new(OPUS_RATE, channels_enum)?;
        if head.output_gain != 0 {
            decoder.set_gain(i32::from(head.output_gain))?;
        }

        let total_frames = last_granule_position(path)?
            .unwrap_or(0)
            .saturating_sub(head.pre_skip as u64);

        debug!(
            channels,
            pre_skip = head.pre_skip,
            total_frames,
            "Ogg/Opus stream opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            packets,
            decoder,
            info: DecoderInfo {
                format: AudioFormat::Opus,
                sample_rate: OPUS_RATE,
                channels: head.channels.min(2),
                total_frames,
            },
            channels,
            pre_skip: head.pre_skip,
            skip_remaining: head.pre_skip as usize,
            pcm_buf: vec![0i16; MAX_FRAME_SAMPLES * channels],
            pending: PendingPcm::default(),
            position: 0,
            eof: false,
        })
    }

    /// Opens the page reader and consumes the two header packets.
    fn open_packets(
        path: &Path,
    ) -> Result<(OggPageReader<BufReader<File>>, OpusHead), DecodeError> {
        let mut packets = OggPageReader::new(BufReader::new(File::open(path)?));

        let head_packet = packets
            .next_packet()?
            .ok_or_else(|| DecodeError::Container("missing OpusHead packet".into()))?;
        let head = OpusHead::parse(&head_packet)?;

        let tags = packets
            .next_packet()?
            .ok_or_else(|| DecodeError::Container("missing OpusTags packet".into()))?;
        if !tags.starts_with(b"OpusTags") {
            return Err(DecodeError::Container("invalid OpusTags packet".into()));
        }

        Ok((packets, head))
    }

    pub fn info(&self) -> DecoderInfo {
        self.info
    }

    pub fn read(&mut self, out: &mut [i16]) -> Result<usize, DecodeError> {
        let want_frames = out.len() / 2;
        let mut written = self.pending.drain_into(out);

        while written < want_frames && !self.eof {
            match self.packets.next_packet()? {
                Some(packet) => {
                    let decoded = self.decoder.decode(&packet, &mut self.pcm_buf, false)?;
                    if decoded == 0 {
                        continue;
                    }

                    let mut start = 0usize;
                    if self.skip_remaining > 0 {
                        let drop = self.skip_remaining.min(decoded);
                        self.skip_remaining -= drop;
                        start = drop;
                        if start == decoded {
                            continue;
                        }
                    }

                    let slice = &self.pcm_buf[start * self.channels..decoded * self.channels];
                    self.pending.push_interleaved(slice, self.channels);
                    written += self.pending.drain_into(&mut out[written * 2..]);
                }
                None => self.eof = true,
            }
        }

        self.position += written as u64;
        Ok(written)
    }

    /// Page-granularity seek: re-reads the stream and starts decoding at the
    /// first page whose granule position reaches the target.
    pub fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        let target = if self.info.total_frames > 0 {
            frame.min(self.info.total_frames)
        } else {
            frame
        };
        let target_granule = target + self.pre_skip as u64;

        let (mut packets, head) = Self::open_packets(&self.path)?;

        // Skip packets while the page they ended on is before the target.
        if target > 0 {
            loop {
                if packets.page_granule() >= target_granule {
                    break;
                }
                if packets.next_packet()?.is_none() {
                    break;
                }
            }
        }

        let channels_enum = if head.channels == 1 {
            Channels::Mono
        } else {
            Channels::Stereo
        };
        self.decoder = OpusDecoder::new(OPUS_RATE, channels_enum)?;
        if head.output_gain != 0 {
            self.decoder.set_gain(i32::from(head.output_gain))?;
        }

        self.packets = packets;
        self.pending.clear();
        self.skip_remaining = if target == 0 { self.pre_skip as usize } else { 0 };
        self.eof = false;
        self.position = target;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.pending.is_empty()
    }
}
