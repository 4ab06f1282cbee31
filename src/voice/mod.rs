//! Voice processing module
//!
//! Handles microphone capture and encoding, and gapless playback of streamed
//! audio. Hardware sits behind [`AudioDevices`] so sessions can run against
//! fakes.

mod capture;
mod device;
mod encoder;
mod frame;
pub mod pcm;
mod playback;
mod scheduler;

pub use capture::{AudioInput, BlockAssembler, DEFAULT_BLOCK_SIZE, MicrophoneCapture};
pub use device::{AudioDevices, CpalDevices, StreamWorker};
pub use encoder::{AudioCaptureEncoder, CAPTURE_SAMPLE_RATE, ChunkSink, EncodedChunk, EncoderStats};
pub use frame::{AudioFrame, duration_to_frames, frames_to_duration};
pub use playback::{SpeakerOutput, Timeline};
pub use scheduler::{
    AudioPlaybackScheduler, PLAYBACK_SAMPLE_RATE, PlaybackBackend, PlaybackEntry, PlaybackId,
};
