//! Ogg/Vorbis decoding via lewton.

use std::{
    fs::File,
    io::BufReader,
    path::Path,
};

use lewton::inside_ogg::OggStreamReader;
use tracing::debug;

use crate::{oggpage, AudioFormat, DecodeError, DecoderInfo, PendingPcm};

pub struct VorbisDecoder {
    reader: OggStreamReader<BufReader<File>>,
    info: DecoderInfo,
    channels: usize,
    pending: PendingPcm,
    position: u64,
    eof: bool,
}

impl VorbisDecoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let reader = OggStreamReader::new(BufReader::new(File::open(path)?))?;
        let sample_rate = reader.ident_hdr.audio_sample_rate;
        let channels = reader.ident_hdr.audio_channels as usize;

        // Duration comes from the granule position of the stream's last page.
        let total_frames = oggpage::last_granule_position(path)?.unwrap_or(0);

        debug!(sample_rate, channels, total_frames, "Ogg/Vorbis stream opened");

        Ok(Self {
            info: DecoderInfo {
                format: AudioFormat::Ogg,
                sample_rate,
                channels: channels.min(2) as u8,
                total_frames,
            },
            channels,
            reader,
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
            match self.reader.read_dec_packet_itl()? {
                Some(samples) => {
                    if samples.is_empty() {
                        continue;
                    }
                    self.pending.push_interleaved(&samples, self.channels);
                    written += self.pending.drain_into(&mut out[written * 2..]);
                }
                None => self.eof = true,
            }
        }

        self.position += written as u64;
        Ok(written)
    }

    /// Page-granularity seek through lewton's absgp seek.
    pub fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        let target = if self.info.total_frames > 0 {
            frame.min(self.info.total_frames)
        } else {
            frame
        };
        self.reader.seek_absgp_pg(target)?;
        self.pending.clear();
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
