//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::device::StreamWorker;
use super::encoder::CAPTURE_SAMPLE_RATE;
use super::frame::AudioFrame;
use crate::{Error, Result};

/// Default number of samples per captured block (256ms at 16kHz)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// An acquired microphone that can deliver fixed-size blocks
pub trait AudioInput: Send {
    /// Start delivering `block_size`-sample blocks to `blocks`
    ///
    /// # Errors
    ///
    /// Returns error if the microphone was already released
    fn attach(&mut self, block_size: usize, blocks: mpsc::Sender<AudioFrame>) -> Result<()>;

    /// Stop delivering blocks
    ///
    /// # Errors
    ///
    /// Returns error if nothing is attached
    fn detach(&mut self) -> Result<()>;

    /// Release the hardware
    ///
    /// # Errors
    ///
    /// Returns error if the microphone was already released
    fn release(&mut self) -> Result<()>;
}

/// Splits arbitrarily sized callback buffers into fixed-size blocks
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl BlockAssembler {
    /// Create an assembler emitting blocks of `block_size` samples
    #[must_use]
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples, emitting every block that becomes complete
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        while !samples.is_empty() {
            let take = (self.block_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(AudioFrame::new(block, self.sample_rate));
            }
        }
    }

    /// Samples waiting for a full block
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Connection between the hardware callback and the capture pipeline
struct Tap {
    assembler: BlockAssembler,
    blocks: mpsc::Sender<AudioFrame>,
}

impl Tap {
    fn push(&mut self, samples: &[f32]) {
        let blocks = &self.blocks;
        self.assembler.push(samples, |frame| match blocks.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                tracing::warn!(samples = frame.len(), "capture queue full, dropping block");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!("capture pipeline gone, dropping block");
            }
        });
    }
}

/// Captures audio from the default input device
pub struct MicrophoneCapture {
    tap: Arc<Mutex<Option<Tap>>>,
    worker: Option<StreamWorker>,
}

impl MicrophoneCapture {
    /// Acquire the default input device and start its stream
    ///
    /// Blocks are only delivered once a pipeline is attached.
    ///
    /// # Errors
    ///
    /// Returns a permission error if the microphone cannot be opened
    pub fn open() -> Result<Self> {
        let tap: Arc<Mutex<Option<Tap>>> = Arc::new(Mutex::new(None));
        let callback_tap = Arc::clone(&tap);

        let worker = StreamWorker::spawn("beacon-mic", move || {
            let host = cpal::default_host();

            let device = host
                .default_input_device()
                .ok_or_else(|| Error::Permission("no input device available".to_string()))?;

            let config = input_config(&device)?;
            let channels = usize::from(config.channels.max(1));

            tracing::debug!(
                device = device.name().unwrap_or_default(),
                sample_rate = CAPTURE_SAMPLE_RATE,
                channels = config.channels,
                "audio capture initialized"
            );

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix(data, channels);
                        if let Ok(mut tap) = callback_tap.lock() {
                            if let Some(tap) = tap.as_mut() {
                                tap.push(&mono);
                            }
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio capture error");
                    },
                    None,
                )
                .map_err(|e| Error::Permission(e.to_string()))?;

            stream.play().map_err(|e| Error::Permission(e.to_string()))?;
            Ok(stream)
        })?;

        tracing::debug!("audio capture started");
        Ok(Self {
            tap,
            worker: Some(worker),
        })
    }

    /// Check if the device is still held
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        CAPTURE_SAMPLE_RATE
    }
}

impl AudioInput for MicrophoneCapture {
    fn attach(&mut self, block_size: usize, blocks: mpsc::Sender<AudioFrame>) -> Result<()> {
        if self.worker.is_none() {
            return Err(Error::Audio("microphone already released".to_string()));
        }

        let mut tap = self
            .tap
            .lock()
            .map_err(|_| Error::Audio("capture tap poisoned".to_string()))?;
        *tap = Some(Tap {
            assembler: BlockAssembler::new(block_size, CAPTURE_SAMPLE_RATE),
            blocks,
        });

        tracing::debug!(block_size, "capture pipeline attached");
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        let mut tap = self
            .tap
            .lock()
            .map_err(|_| Error::Audio("capture tap poisoned".to_string()))?;

        match tap.take() {
            Some(previous) => {
                tracing::debug!(
                    discarded = previous.assembler.pending(),
                    "capture pipeline detached"
                );
                Ok(())
            }
            None => Err(Error::Audio("capture pipeline not attached".to_string())),
        }
    }

    fn release(&mut self) -> Result<()> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| Error::Audio("microphone already released".to_string()))?;

        if let Ok(mut tap) = self.tap.lock() {
            tap.take();
        }
        worker.stop();

        tracing::debug!("audio capture stopped");
        Ok(())
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }
}

/// Pick a 16kHz input config, preferring mono
fn input_config(device: &cpal::Device) -> Result<StreamConfig> {
    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
            && c.sample_format() == cpal::SampleFormat::F32
    };

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Permission(e.to_string()))?
        .find(|c| c.channels() == 1 && supports_rate(c))
        .or_else(|| {
            // Fallback: any channel count, downmixed in the callback
            device
                .supported_input_configs()
                .ok()?
                .find(|c| supports_rate(c))
        })
        .ok_or_else(|| Error::Permission("no suitable audio config found".to_string()))?;

    Ok(supported_config
        .with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE))
        .config())
}

/// Average interleaved channels into mono
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }

    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}
