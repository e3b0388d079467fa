//! # Live Tutor Backend
//!
//! Bridges the local microphone and speakers to a remote real-time
//! conversational audio service.
//!
//! ## Module Layout:
//! - **audio**: PCM codec, capture framing and playback scheduling
//! - **device**: cpal-backed audio devices
//! - **live**: session lifecycle controller and the remote transport
//! - **config** / **state** / **error**: ambient application plumbing
//! - **handlers** / **health** / **middleware** / **websocket**: the HTTP surface

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod handlers;
pub mod health;
pub mod live;
pub mod middleware;
pub mod state;
pub mod websocket;

#[cfg(test)]
mod testing;
