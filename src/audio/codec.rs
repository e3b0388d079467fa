//! # PCM Codec
//!
//! Converts captured floating-point samples into 16-bit little-endian PCM and
//! wraps them in a text-safe (base64) transport envelope, and does the inverse
//! for audio coming back from the remote endpoint.
//!
//! ## Wire Format:
//! - **Bit Depth**: 16-bit signed PCM
//! - **Encoding**: Little-endian, interleaved by channel
//! - **Transport**: Standard base64 with padding
//! - **Mime tag**: `audio/pcm;rate=<sample rate>`
//!
//! ## Quantization:
//! Samples are multiplied by 32768 and truncated toward zero. Out-of-range
//! values are NOT clamped: they wrap modulo 2^16, so `1.0` becomes `-32768`.
//! Callers that need clamping must do it before encoding.

use crate::error::{LiveError, LiveResult};
use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Scale between float samples and 16-bit integers.
pub const PCM_SCALE: f32 = 32768.0;

/// Rate of the audio sent upstream.
pub const UPSTREAM_SAMPLE_RATE: u32 = 16000;

/// A block of interleaved 16-bit samples with its format.
///
/// Invariant: `samples.len()` is a multiple of `channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Build a frame, rejecting buffers that don't hold whole sample frames.
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> LiveResult<Self> {
        if channels == 0 {
            return Err(LiveError::DecodeError("channel count must be at least 1".to_string()));
        }
        if sample_rate == 0 {
            return Err(LiveError::DecodeError("sample rate must be greater than 0".to_string()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(LiveError::DecodeError(format!(
                "{} samples is not a multiple of {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// De-interleave one channel and rescale it to [-1.0, 1.0).
    pub fn channel_data(&self, channel: u16) -> Vec<f32> {
        let channels = self.channels as usize;
        let channel = channel as usize;
        if channel >= channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(channel)
            .step_by(channels)
            .map(|&sample| sample as f32 / PCM_SCALE)
            .collect()
    }

    /// Little-endian byte representation.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for &sample in &self.samples {
            // Writing into a Vec cannot fail
            let _ = bytes.write_i16::<LittleEndian>(sample);
        }
        bytes
    }
}

/// Text-safe envelope of one PCM frame, as placed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportEnvelope {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

impl TransportEnvelope {
    /// Sample rate declared by the mime tag, if any.
    pub fn declared_rate(&self) -> Option<u32> {
        parse_mime_rate(&self.mime_type)
    }
}

/// `audio/pcm;rate=16000` style mime tag.
pub fn mime_type_for_rate(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Extract the `rate=` parameter from a PCM mime tag.
pub fn parse_mime_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("rate="))
        .and_then(|rate| rate.trim().parse().ok())
}

/// Quantize one float sample the way a JS `Int16Array` store does:
/// scale, truncate toward zero, wrap modulo 2^16. NaN and infinities become 0.
pub fn quantize_sample(sample: f32) -> i16 {
    let scaled = sample as f64 * PCM_SCALE as f64;
    if !scaled.is_finite() {
        return 0;
    }
    let wrapped = scaled.trunc().rem_euclid(65536.0);
    let signed = if wrapped >= 32768.0 { wrapped - 65536.0 } else { wrapped };
    signed as i16
}

/// Convert float samples to 16-bit PCM using [`quantize_sample`].
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&sample| quantize_sample(sample)).collect()
}

/// Convert 16-bit PCM samples to floats in [-1.0, 1.0).
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / PCM_SCALE).collect()
}

/// Encode one capture window for upstream transmission (16 kHz mono tag).
pub fn encode(samples: &[f32]) -> TransportEnvelope {
    encode_with_rate(samples, UPSTREAM_SAMPLE_RATE)
}

/// Encode float samples with an explicit rate in the mime tag.
pub fn encode_with_rate(samples: &[f32], sample_rate: u32) -> TransportEnvelope {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let _ = bytes.write_i16::<LittleEndian>(quantize_sample(sample));
    }

    TransportEnvelope {
        mime_type: mime_type_for_rate(sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    }
}

/// Decode a base64 PCM payload into an [`AudioFrame`].
///
/// ## Errors:
/// `DecodeError` when the text is not valid base64 or when the byte length
/// is not a multiple of `2 * channels`.
pub fn decode(envelope: &str, sample_rate: u32, channels: u16) -> LiveResult<AudioFrame> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(envelope.trim())
        .map_err(|e| LiveError::DecodeError(format!("invalid base64: {}", e)))?;
    decode_bytes(&bytes, sample_rate, channels)
}

/// Decode raw little-endian PCM bytes into an [`AudioFrame`].
pub fn decode_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> LiveResult<AudioFrame> {
    if channels == 0 {
        return Err(LiveError::DecodeError("channel count must be at least 1".to_string()));
    }
    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(LiveError::DecodeError(format!(
            "{} bytes is not a multiple of {} ({} channel(s) of 16-bit PCM)",
            bytes.len(),
            frame_bytes,
            channels
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    AudioFrame::new(samples, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_within_one_step() {
        let samples: Vec<f32> = (0..2000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.999)
            .chain([-1.0, -0.5, 0.0, 0.25, 0.999_969_5])
            .collect();

        let envelope = encode(&samples);
        let frame = decode(&envelope.data, UPSTREAM_SAMPLE_RATE, 1).unwrap();
        let restored = frame.channel_data(0);

        assert_eq!(restored.len(), samples.len());
        for (original, restored) in samples.iter().zip(restored.iter()) {
            let diff = (original - restored).abs();
            assert!(
                diff <= 1.0 / PCM_SCALE,
                "round trip error too large: {} vs {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_encode_tags_upstream_rate() {
        let envelope = encode(&[0.0; 4]);
        assert_eq!(envelope.mime_type, "audio/pcm;rate=16000");
        assert_eq!(envelope.declared_rate(), Some(16000));
        // 4 samples → 8 bytes → 12 base64 chars
        assert_eq!(envelope.data.len(), 12);
    }

    #[test]
    fn test_out_of_range_samples_wrap_instead_of_clamping() {
        assert_eq!(quantize_sample(1.0), -32768);
        assert_eq!(quantize_sample(-1.0), -32768);
        assert_eq!(quantize_sample(1.5), -16384);
        assert_eq!(quantize_sample(0.5), 16384);
        assert_eq!(quantize_sample(f32::NAN), 0);
        assert_eq!(quantize_sample(f32::INFINITY), 0);
    }

    #[test]
    fn test_quantize_truncates_toward_zero() {
        // 0.00005 * 32768 = 1.6384 → 1, and the negative side → -1
        assert_eq!(quantize_sample(0.00005), 1);
        assert_eq!(quantize_sample(-0.00005), -1);
    }

    #[test]
    fn test_encode_is_little_endian() {
        let envelope = encode(&[0.5]);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&envelope.data)
            .unwrap();
        assert_eq!(bytes, 16384i16.to_le_bytes().to_vec());
    }

    #[test]
    fn test_decode_rejects_partial_frames() {
        // 3 bytes is not a whole 16-bit sample
        let odd = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(decode(&odd, 24000, 1), Err(LiveError::DecodeError(_))));

        // 6 bytes = 3 samples, not a whole stereo frame
        let stereo = base64::engine::general_purpose::STANDARD.encode([0u8; 6]);
        assert!(matches!(decode(&stereo, 24000, 2), Err(LiveError::DecodeError(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(matches!(
            decode("not base64!!", 24000, 1),
            Err(LiveError::DecodeError(_))
        ));
    }

    #[test]
    fn test_decode_deinterleaves_channels() {
        let samples: Vec<i16> = vec![100, -100, 200, -200, 300, -300];
        let frame = AudioFrame::new(samples, 24000, 2).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(frame.to_le_bytes());

        let decoded = decode(&encoded, 24000, 2).unwrap();
        assert_eq!(decoded.frame_count(), 3);
        assert_eq!(
            decoded.channel_data(0),
            vec![100.0 / PCM_SCALE, 200.0 / PCM_SCALE, 300.0 / PCM_SCALE]
        );
        assert_eq!(
            decoded.channel_data(1),
            vec![-100.0 / PCM_SCALE, -200.0 / PCM_SCALE, -300.0 / PCM_SCALE]
        );
        assert!(decoded.channel_data(2).is_empty());
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0; 12000], 24000, 1).unwrap();
        assert!((frame.duration_secs() - 0.5).abs() < f64::EPSILON);

        let stereo = AudioFrame::new(vec![0; 48000], 24000, 2).unwrap();
        assert!((stereo.duration_secs() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frame_rejects_ragged_buffers() {
        assert!(AudioFrame::new(vec![0; 3], 24000, 2).is_err());
        assert!(AudioFrame::new(vec![0; 4], 24000, 0).is_err());
    }

    #[test]
    fn test_parse_mime_rate() {
        assert_eq!(parse_mime_rate("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(parse_mime_rate("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(parse_mime_rate("audio/pcm"), None);
        assert_eq!(parse_mime_rate("audio/pcm;rate=abc"), None);
    }

    #[test]
    fn test_pcm_float_helpers() {
        let pcm = vec![0i16, 16384, -16384, 32767, -32768];
        let floats = pcm_to_float(&pcm);
        assert_eq!(float_to_pcm(&floats), pcm);
    }
}
