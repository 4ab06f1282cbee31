//! Mono audio blocks

use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A block of normalized mono samples at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from normalized samples in [-1.0, 1.0]
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Samples in arrival order
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Consume the frame, returning its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count (frames are always mono)
    #[must_use]
    pub const fn channels(&self) -> u16 {
        1
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of the frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        frames_to_duration(self.samples.len() as u64, self.sample_rate)
    }
}

/// Convert a frame count to a duration, rounding down to the nanosecond
#[must_use]
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = u128::from(frames) * NANOS_PER_SEC / u128::from(sample_rate);
    #[allow(clippy::cast_possible_truncation)]
    Duration::from_nanos(nanos as u64)
}

/// Convert a duration to a frame index, rounding up
///
/// Paired with [`frames_to_duration`] this maps `start + duration` back onto
/// the exact frame after the previous buffer's last frame.
#[must_use]
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    let scaled = duration.as_nanos() * u128::from(sample_rate);
    #[allow(clippy::cast_possible_truncation)]
    let frames = scaled.div_ceil(NANOS_PER_SEC) as u64;
    frames
}
