//! Audio format definitions and PCM utilities.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{DuplexError, Result};

/// Sample rate the remote speech endpoint expects for microphone input.
pub const INPUT_TARGET_RATE: u32 = 16_000;

/// Sample rate of the audio the remote speech endpoint sends back.
pub const OUTPUT_RATE: u32 = 24_000;

/// MIME type used for outbound video frames.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// Mono 16-bit PCM format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 16000).
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono).
    pub channels: u8,
    /// Bits per sample.
    pub bits_per_sample: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Mono PCM16 at an arbitrary rate.
    pub fn pcm16(sample_rate: u32) -> Self {
        Self { sample_rate, channels: 1, bits_per_sample: 16 }
    }

    /// PCM16 format at 24kHz (remote output default).
    pub fn pcm16_24khz() -> Self {
        Self::pcm16(OUTPUT_RATE)
    }

    /// PCM16 format at 16kHz (remote input default).
    pub fn pcm16_16khz() -> Self {
        Self::pcm16(INPUT_TARGET_RATE)
    }

    /// The MIME descriptor sent alongside encoded frames, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Calculate bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample / 8) as u32
    }
}

/// A window of microphone samples tagged with the rate they were captured at.
///
/// Frames are transient: the capture pipeline produces one per platform
/// callback and drops it as soon as it has been encoded.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    /// Mono samples in `[-1.0, 1.0]` (values outside are clamped on encode).
    pub samples: &'a [f32],
    /// Native capture rate in Hz.
    pub sample_rate: u32,
}

impl<'a> AudioFrame<'a> {
    /// Wrap a capture window.
    pub fn new(samples: &'a [f32], sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Duration of the window in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A decoded chunk of remote audio ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of `samples`.
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Create a new audio chunk.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// A chunk of silence lasting `secs` seconds.
    pub fn silence(secs: f64, sample_rate: u32) -> Self {
        let len = (secs * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    /// Duration of this chunk in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Whether the chunk carries no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decode a base64 PCM16 little-endian payload.
    pub fn from_base64_pcm16(encoded: &str, sample_rate: u32) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DuplexError::decode(format!("invalid base64 audio: {}", e)))?;
        Ok(Self::new(pcm16_to_float(&bytes)?, sample_rate))
    }
}

/// Quantize float samples to 16-bit signed little-endian PCM.
///
/// Each sample is clamped to `[-1.0, 1.0]` first. Negative values scale by
/// 32768 and positive ones by 32767 so both ends of the range are reachable.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let value = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
        data.extend_from_slice(&(value as i16).to_le_bytes());
    }
    data
}

/// Convert 16-bit little-endian PCM back to floats in `[-1.0, 1.0)`.
///
/// Returns a decode error if the data length is not even.
pub fn pcm16_to_float(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 2 != 0 {
        return Err(DuplexError::decode(format!(
            "Invalid data length for PCM16: {} (must be even)",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Base64-encode raw bytes with the standard alphabet.
pub fn to_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}
