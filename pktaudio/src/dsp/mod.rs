//! The output DSP chain.
//!
//! Applied to callback output just before hand-off, in this order:
//! volume curve, then (speaker sink only) high-pass filter and soft
//! limiter.

mod highpass;
mod limiter;
mod volume;

pub use highpass::Highpass;
pub use limiter::{apply_limiter, soft_limit};
pub use volume::{apply_volume, volume_curve};
