//! PCM16 little-endian wire encoding
//!
//! Audio crosses the wire as base64 text wrapping signed 16-bit little-endian
//! mono PCM. Samples are quantized with a 32768 scale and saturate at 32767,
//! so decoding an encoded sample is off by at most 1/32768.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

const PCM16_SCALE: f32 = 32768.0;

/// Quantize a normalized sample to signed 16-bit PCM
#[must_use]
pub fn sample_to_pcm16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    #[allow(clippy::cast_possible_truncation)]
    let quantized = (clamped * PCM16_SCALE)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    quantized
}

/// Convert a signed 16-bit PCM sample back to the normalized range
#[must_use]
pub fn pcm16_to_sample(value: i16) -> f32 {
    f32::from(value) / PCM16_SCALE
}

/// Pack normalized samples as little-endian PCM16 bytes
#[must_use]
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_pcm16(sample).to_le_bytes());
    }
    bytes
}

/// Unpack little-endian PCM16 bytes into normalized samples
///
/// # Errors
///
/// Returns error if the byte count is odd
pub fn decode_pcm16_le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Encode samples as base64 PCM16 for the wire
#[must_use]
pub fn encode_base64(samples: &[f32]) -> String {
    STANDARD.encode(encode_pcm16_le(samples))
}

/// Decode a base64 PCM16 payload from the wire
///
/// # Errors
///
/// Returns error if the payload is not valid base64 or not whole PCM16 samples
pub fn decode_base64(payload: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Decode(format!("invalid base64 audio: {e}")))?;
    decode_pcm16_le(&bytes)
}
