//! Capture-side encoding pipeline

use std::sync::Arc;

use tokio::sync::mpsc;

use super::frame::AudioFrame;
use super::pcm;
use crate::Result;

/// Sample rate for audio capture (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// One wire-encoded block of captured audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// MIME type announcing encoding and rate (e.g. `audio/pcm;rate=16000`)
    pub mime_type: String,
    /// Base64 little-endian PCM16
    pub data: String,
}

/// Destination for encoded chunks
///
/// Implementations must not block; a failed send is reported and the
/// pipeline moves on to the next block.
pub trait ChunkSink: Send + Sync {
    /// Forward one chunk
    ///
    /// # Errors
    ///
    /// Returns error if the chunk could not be queued
    fn send_chunk(&self, chunk: EncodedChunk) -> Result<()>;
}

/// Converts captured blocks to wire chunks and forwards them
#[derive(Debug, Clone)]
pub struct AudioCaptureEncoder {
    mime_type: String,
}

/// Counters reported when the pipeline stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    /// Chunks handed to the sink
    pub sent: u64,
    /// Chunks the sink refused
    pub failed: u64,
}

impl AudioCaptureEncoder {
    /// Create an encoder for blocks captured at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mime_type: format!("audio/pcm;rate={sample_rate}"),
        }
    }

    /// MIME type attached to every chunk
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Encode one block
    #[must_use]
    pub fn encode(&self, frame: &AudioFrame) -> EncodedChunk {
        EncodedChunk {
            mime_type: self.mime_type.clone(),
            data: pcm::encode_base64(frame.samples()),
        }
    }

    /// Encode and forward blocks until the capture side hangs up
    pub async fn run<S>(self, mut blocks: mpsc::Receiver<AudioFrame>, sink: Arc<S>) -> EncoderStats
    where
        S: ChunkSink + ?Sized,
    {
        let mut stats = EncoderStats::default();

        while let Some(frame) = blocks.recv().await {
            let chunk = self.encode(&frame);
            match sink.send_chunk(chunk) {
                Ok(()) => stats.sent += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(error = %e, samples = frame.len(), "dropped audio chunk");
                }
            }
        }

        tracing::debug!(sent = stats.sent, failed = stats.failed, "capture encoder stopped");
        stats
    }
}
