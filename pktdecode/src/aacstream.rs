//! Push-style AAC (ADTS) decoding over fdk-aac.
//!
//! One wrapper serves every AAC consumer: raw `.aac` files, MP4 samples
//! wrapped into ADTS frames, Icecast AAC streams and HLS segments. Callers
//! push byte runs in whatever sizes the transport produced; decoded frames
//! come back through a callback together with the stream parameters fdk
//! reports (which, unlike the ADTS header, are correct for HE-AAC).

use fdk_aac::dec::{Decoder as FdkDecoder, Transport};

use crate::DecodeError;

/// Largest decoded frame: 2048 frames (HE-AAC) x 8 channels.
const PCM_BUF_SAMPLES: usize = 2048 * 8;

pub struct AacStreamDecoder {
    decoder: FdkDecoder,
    pcm_buf: Vec<i16>,
}

impl AacStreamDecoder {
    pub fn new() -> Self {
        Self {
            decoder: FdkDecoder::new(Transport::Adts),
            pcm_buf: vec![0i16; PCM_BUF_SAMPLES],
        }
    }

    /// Drops all transport and codec state.
    ///
    /// Called between HLS segments and after seeks so stale bit-reservoir
    /// data cannot splice into the new position.
    pub fn reset(&mut self) {
        self.decoder = FdkDecoder::new(Transport::Adts);
    }

    /// Feeds a run of ADTS bytes, invoking `on_pcm(samples, channels, rate)`
    /// for every decoded frame. `samples` is interleaved and holds
    /// `frames * channels` values.
    pub fn push(
        &mut self,
        mut data: &[u8],
        mut on_pcm: impl FnMut(&[i16], u8, u32),
    ) -> Result<(), DecodeError> {
        while !data.is_empty() {
            let consumed = self
                .decoder
                .fill(data)
                .map_err(|e| DecodeError::Codec(format!("AAC fill failed: {e:?}")))?;
            if consumed == 0 {
                // Decoder refuses more input without decoding: drain first.
                if !self.drain_frames(&mut on_pcm) {
                    return Err(DecodeError::Codec(
                        "AAC decoder made no progress on input".into(),
                    ));
                }
                continue;
            }
            data = &data[consumed..];
            self.drain_frames(&mut on_pcm);
        }
        self.drain_frames(&mut on_pcm);
        Ok(())
    }

    /// Decodes as many frames as the internal buffer allows.
    ///
    /// Returns true when at least one frame came out. Decode errors are
    /// treated as "needs more input": ADTS is self-synchronising, so a
    /// corrupt frame costs audio but never the session.
    fn drain_frames(&mut self, on_pcm: &mut impl FnMut(&[i16], u8, u32)) -> bool {
        let mut produced = false;
        loop {
            match self.decoder.decode_frame(&mut self.pcm_buf) {
                Ok(()) => {
                    let info = self.decoder.stream_info();
                    let channels = (info.numChannels.max(1) as usize).min(8);
                    let rate = info.sampleRate.max(0) as u32;
                    let samples = self.decoder.decoded_frame_size().min(self.pcm_buf.len());
                    if samples == 0 {
                        break;
                    }
                    on_pcm(&self.pcm_buf[..samples], channels as u8, rate);
                    produced = true;
                }
                Err(_) => break,
            }
        }
        produced
    }
}

impl Default for AacStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
