//! # PCM Codec
//!
//! Converts between floating-point audio samples and the transport encoding
//! used on the live channel, and packages raw PCM into a WAV container for
//! asset download.
//!
//! ## Audio Format Requirements:
//! - **Bit Depth**: 16-bit PCM
//! - **Encoding**: little-endian signed integers
//! - **Transport**: base64 (standard alphabet) of the raw PCM bytes
//!
//! All functions here are pure transforms: no devices, no clocks, no I/O.

use crate::error::SessionError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// A transport-safe unit of encoded audio: base64 of 16-bit little-endian PCM.
///
/// Immutable once created; sent outbound on the live channel, received inbound
/// as synthesized audio fragments, and stored verbatim for gallery assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Base64 payload (standard alphabet, with padding)
    pub data: String,
}

impl EncodedChunk {
    /// Wrap an already-encoded base64 payload (e.g. received from the channel).
    pub fn from_base64(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }

    /// Number of base64 characters in the payload.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A decoded buffer of playable audio, tagged with its format.
///
/// Samples are interleaved f32 in [-1.0, 1.0]. Owned by the playback
/// scheduler from `schedule()` until the source finishes or is stopped.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    /// Playable duration in seconds: `frames / sample_rate`.
    ///
    /// A zero-sample buffer is legal and has duration 0.0.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let frames = self.samples.len() / self.channels as usize;
        frames as f64 / self.sample_rate as f64
    }
}

/// Encode one capture frame as a transport chunk.
///
/// ## Conversion:
/// Each sample is clamped to [-1.0, 1.0], scaled to the signed 16-bit range,
/// serialized little-endian and base64-encoded. O(n) in the frame length,
/// no side effects.
pub fn encode_frame(samples: &[f32]) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let scaled = (clamped * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&scaled.to_le_bytes());
    }
    EncodedChunk {
        data: BASE64.encode(&bytes),
    }
}

/// Decode the transport encoding back to raw bytes.
///
/// This is the inverse of the base64 step only (not the sample scaling): it
/// round-trips exactly for any byte sequence, which matters because it is also
/// used for chunks persisted verbatim (asset WAV download).
pub fn decode_chunk(chunk: &EncodedChunk) -> Result<Vec<u8>, SessionError> {
    BASE64
        .decode(chunk.data.as_bytes())
        .map_err(|e| SessionError::Decode(format!("invalid base64 payload: {}", e)))
}

/// Reinterpret raw bytes as 16-bit little-endian PCM and normalize to f32.
///
/// ## Errors:
/// Fails with a decode error if the byte length is not a multiple of
/// 2 bytes x channel count (a torn sample).
pub fn decode_to_audio_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, SessionError> {
    let bytes_per_frame = 2 * channels as usize;
    if bytes_per_frame == 0 {
        return Err(SessionError::Decode("channel count must be non-zero".to_string()));
    }
    if bytes.len() % bytes_per_frame != 0 {
        return Err(SessionError::Decode(format!(
            "PCM byte length {} is not a multiple of {} (2 bytes x {} channels)",
            bytes.len(),
            bytes_per_frame,
            channels
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Wrap raw 16-bit PCM bytes in a canonical WAV container.
///
/// ## Container Layout:
/// RIFF chunk descriptor, `fmt ` block (PCM format tag, channel count, sample
/// rate, derived byte-rate and block-align, 16-bit depth) and `data` block -
/// a fixed 44-byte header followed by the payload, playable by standard audio
/// tools. Deterministic, no compression.
pub fn package_wav(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<u8>, SessionError> {
    if channels == 0 {
        return Err(SessionError::Decode("channel count must be non-zero".to_string()));
    }
    if bytes.len() % (2 * channels as usize) != 0 {
        return Err(SessionError::Decode(format!(
            "PCM byte length {} is not sample-aligned for {} channel(s)",
            bytes.len(),
            channels
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, channels, sample_rate, 16);
    let mut out = Cursor::new(Vec::new());
    wav::write(header, &wav::BitDepth::Sixteen(samples), &mut out)
        .map_err(|e| SessionError::Decode(format!("WAV packaging failed: {}", e)))?;
    Ok(out.into_inner())
}
