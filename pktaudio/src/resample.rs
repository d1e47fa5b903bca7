//! Stereo sample-rate conversion on top of libsoxr.
//!
//! The converter is stateful: soxr carries its filter tail between calls, so
//! chunk boundaries are seamless no matter how the producer slices its
//! reads. [`Resampler::reset`] rebuilds the converter, which is the flush
//! point after a seek or a sink-rate change. When source and destination
//! rates match, `process` degenerates to a copy.

use soxr::format::Stereo;
use soxr::params::{QualityRecipe, QualitySpec, RuntimeSpec};
use soxr::Soxr;

use crate::AudioError;

const I16_SCALE: f32 = 32767.0;

pub struct Resampler {
    source_hz: u32,
    dest_hz: u32,
    soxr: Option<Soxr<Stereo<f32>>>,
}

impl Resampler {
    pub fn new(source_hz: u32, dest_hz: u32) -> Result<Self, AudioError> {
        let soxr = if source_hz == dest_hz {
            None
        } else {
            Some(build_soxr(source_hz, dest_hz)?)
        };
        Ok(Self {
            source_hz,
            dest_hz,
            soxr,
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_hz
    }

    pub fn dest_rate(&self) -> u32 {
        self.dest_hz
    }

    /// Converts one chunk of interleaved stereo samples.
    ///
    /// `is_last` flushes the converter tail so the final samples of a track
    /// are not left inside the filter.
    pub fn process(&mut self, input: &[i16], is_last: bool) -> Result<Vec<i16>, AudioError> {
        let Some(soxr) = self.soxr.as_mut() else {
            return Ok(input.to_vec());
        };

        let in_frames = input.len() / 2;
        let mut pairs = vec![[0.0f32; 2]; in_frames];
        for (pair, frame) in pairs.iter_mut().zip(input.chunks_exact(2)) {
            pair[0] = frame[0] as f32 / I16_SCALE;
            pair[1] = frame[1] as f32 / I16_SCALE;
        }

        let ratio = self.dest_hz as f64 / self.source_hz as f64;
        let out_len = ((in_frames as f64) * ratio).ceil() as usize;
        let mut output = vec![[0.0f32; 2]; out_len];

        soxr.process(&pairs, &mut output)
            .map_err(|e| AudioError::Resampler(e.to_string()))?;

        let mut result = pairs_to_i16(&output);

        if is_last {
            // Drain the filter tail with an empty final input.
            let tail_len = (ratio.ceil() as usize).max(64);
            let mut tail = vec![[0.0f32; 2]; tail_len];
            soxr.process(&[], &mut tail)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;
            result.extend_from_slice(&pairs_to_i16(&tail));
        }

        Ok(result)
    }

    /// Discards all converter state; used on seek and sink reconfiguration.
    pub fn reset(&mut self) -> Result<(), AudioError> {
        if self.soxr.is_some() {
            self.soxr = Some(build_soxr(self.source_hz, self.dest_hz)?);
        }
        Ok(())
    }
}

fn build_soxr(source_hz: u32, dest_hz: u32) -> Result<Soxr<Stereo<f32>>, AudioError> {
    let quality = QualitySpec::new(QualityRecipe::high());
    let rt = RuntimeSpec::default();
    Soxr::<Stereo<f32>>::new_with_params(source_hz as f64, dest_hz as f64, quality, rt)
        .map_err(|e| AudioError::Resampler(e.to_string()))
}

fn pairs_to_i16(pairs: &[[f32; 2]]) -> Vec<i16> {
    let mut out = Vec::with_capacity(pairs.len() * 2);
    for pair in pairs {
        out.push((pair[0].clamp(-1.0, 1.0) * I16_SCALE) as i16);
        out.push((pair[1].clamp(-1.0, 1.0) * I16_SCALE) as i16);
    }
    out
}
