//! # Audio Module
//!
//! Everything between the sound card and the wire format of the live session.
//!
//! ## Key Components:
//! - **Codec**: float ↔ 16-bit PCM ↔ base64 transport envelopes
//! - **Capture**: microphone → fixed-size windows of float samples
//! - **Playback**: decoded frames → gap-free schedule on the output clock
//! - **Platform**: traits over the host audio devices (cpal impl lives in `crate::device`)
//!
//! ## Audio Format:
//! - **Upstream**: 16 kHz, 16-bit little-endian PCM, mono
//! - **Downstream**: 24 kHz by default, 16-bit little-endian PCM, mono

pub mod capture;   // Microphone framing
pub mod codec;     // PCM conversion and base64 envelopes
pub mod platform;  // Device traits
pub mod playback;  // Output scheduling
