//! Audio playback to speakers

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::device::StreamWorker;
use super::frame::{AudioFrame, duration_to_frames, frames_to_duration};
use super::scheduler::{PLAYBACK_SAMPLE_RATE, PlaybackBackend, PlaybackId};
use crate::{Error, Result};

/// A buffer placed on the timeline
#[derive(Debug)]
struct Voice {
    id: PlaybackId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }

    fn sample_at(&self, frame: u64) -> Option<f32> {
        let offset = frame.checked_sub(self.start_frame)?;
        usize::try_from(offset)
            .ok()
            .and_then(|i| self.samples.get(i))
            .copied()
    }
}

/// Frame-accurate output timeline
///
/// The clock is the number of frames handed to the device. Buffers start on
/// the frame their start time maps to; a buffer whose start has already been
/// rendered plays from the matching offset.
#[derive(Debug)]
pub struct Timeline {
    sample_rate: u32,
    rendered: u64,
    next_id: u64,
    voices: Vec<Voice>,
    finished: Vec<PlaybackId>,
}

impl Timeline {
    /// Create an empty timeline at `sample_rate`
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            rendered: 0,
            next_id: 0,
            voices: Vec::new(),
            finished: Vec::new(),
        }
    }

    /// Clock time of the next frame to render
    #[must_use]
    pub fn now(&self) -> Duration {
        frames_to_duration(self.rendered, self.sample_rate)
    }

    /// Place samples so they start at clock time `at`
    pub fn insert(&mut self, samples: Vec<f32>, at: Duration) -> PlaybackId {
        self.next_id += 1;
        let id = PlaybackId(self.next_id);
        self.voices.push(Voice {
            id,
            start_frame: duration_to_frames(at, self.sample_rate),
            samples,
        });
        id
    }

    /// Remove a buffer without reporting it as finished
    pub fn remove(&mut self, id: PlaybackId) {
        self.voices.retain(|v| v.id != id);
    }

    /// Fill an interleaved output buffer and advance the clock
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut frames = 0u64;

        for frame in out.chunks_mut(channels) {
            let position = self.rendered + frames;
            let sample = self
                .voices
                .iter()
                .find_map(|v| v.sample_at(position))
                .unwrap_or(0.0);
            frame.fill(sample);
            frames += 1;
        }

        self.rendered += frames;
        let rendered = self.rendered;
        self.voices.retain(|v| {
            if v.end_frame() <= rendered {
                self.finished.push(v.id);
                false
            } else {
                true
            }
        });
    }

    /// Ids of buffers fully rendered since the last call
    pub fn take_finished(&mut self) -> Vec<PlaybackId> {
        std::mem::take(&mut self.finished)
    }

    /// Number of buffers still on the timeline
    #[must_use]
    pub fn pending(&self) -> usize {
        self.voices.len()
    }
}

/// Plays scheduled audio on the default output device
pub struct SpeakerOutput {
    timeline: Arc<Mutex<Timeline>>,
    worker: Option<StreamWorker>,
}

impl SpeakerOutput {
    /// Open the default output device at the playback rate
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open() -> Result<Self> {
        let timeline = Arc::new(Mutex::new(Timeline::new(PLAYBACK_SAMPLE_RATE)));
        let render_timeline = Arc::clone(&timeline);

        let worker = StreamWorker::spawn("beacon-speaker", move || {
            let host = cpal::default_host();

            let device = host
                .default_output_device()
                .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

            let config = output_config(&device)?;
            let channels = usize::from(config.channels);

            tracing::debug!(
                device = device.name().unwrap_or_default(),
                sample_rate = PLAYBACK_SAMPLE_RATE,
                channels = config.channels,
                "audio playback initialized"
            );

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        match render_timeline.lock() {
                            Ok(mut timeline) => timeline.render(data, channels),
                            Err(_) => data.fill(0.0),
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?;

            stream.play().map_err(|e| Error::Audio(e.to_string()))?;
            Ok(stream)
        })?;

        Ok(Self {
            timeline,
            worker: Some(worker),
        })
    }

    fn timeline(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlaybackBackend for SpeakerOutput {
    fn current_time(&self) -> Duration {
        self.timeline().now()
    }

    fn start_at(&mut self, frame: AudioFrame, at: Duration) -> Result<PlaybackId> {
        if self.worker.is_none() {
            return Err(Error::Audio("speaker already closed".to_string()));
        }
        if frame.sample_rate() != PLAYBACK_SAMPLE_RATE {
            return Err(Error::Audio(format!(
                "expected {PLAYBACK_SAMPLE_RATE}Hz audio, got {}Hz",
                frame.sample_rate()
            )));
        }

        Ok(self.timeline().insert(frame.into_samples(), at))
    }

    fn stop(&mut self, id: PlaybackId) {
        self.timeline().remove(id);
    }

    fn take_finished(&mut self) -> Vec<PlaybackId> {
        self.timeline().take_finished()
    }

    fn close(&mut self) -> Result<()> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| Error::Audio("speaker already closed".to_string()))?;
        worker.stop();

        let pending = self.timeline().pending();
        tracing::debug!(pending, "audio playback closed");
        Ok(())
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }
}

/// Pick a 24kHz output config, preferring mono
fn output_config(device: &cpal::Device) -> Result<StreamConfig> {
    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    Ok(supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000;

    #[test]
    fn renders_buffers_at_their_start_frame() {
        let mut timeline = Timeline::new(RATE);
        timeline.insert(vec![0.5, 0.5], Duration::from_millis(2));
        timeline.insert(vec![-0.25], Duration::from_millis(4));

        let mut out = vec![9.0; 6];
        timeline.render(&mut out, 1);

        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, -0.25, 0.0]);
        assert_eq!(timeline.now(), Duration::from_millis(6));
        assert_eq!(timeline.take_finished(), vec![PlaybackId(1), PlaybackId(2)]);
        assert!(timeline.take_finished().is_empty());
    }

    #[test]
    fn duplicates_mono_across_channels() {
        let mut timeline = Timeline::new(RATE);
        timeline.insert(vec![0.1, 0.2], Duration::ZERO);

        let mut out = vec![0.0; 4];
        timeline.render(&mut out, 2);

        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn late_start_plays_remaining_tail() {
        let mut timeline = Timeline::new(RATE);
        let mut out = vec![0.0; 3];
        timeline.render(&mut out, 1);

        // Scheduled for frame 1, clock is already at frame 3
        timeline.insert(vec![0.1, 0.2, 0.3, 0.4], Duration::from_millis(1));
        let mut out = vec![0.0; 3];
        timeline.render(&mut out, 1);

        assert_eq!(out, vec![0.3, 0.4, 0.0]);
    }

    #[test]
    fn removed_buffers_are_silent_and_unreported() {
        let mut timeline = Timeline::new(RATE);
        let id = timeline.insert(vec![0.7; 4], Duration::ZERO);
        timeline.remove(id);

        let mut out = vec![1.0; 4];
        timeline.render(&mut out, 1);

        assert_eq!(out, vec![0.0; 4]);
        assert!(timeline.take_finished().is_empty());
        assert_eq!(timeline.pending(), 0);
    }
}
