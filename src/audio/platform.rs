//! # Audio Platform Seam
//!
//! Traits over the host audio system. The live controller only talks to these;
//! `crate::device` provides the cpal-backed implementation and the tests use
//! scripted fakes.
//!
//! ## Mapping to the resources a session acquires:
//! - **OutputContext**: the playback device, with a monotonic clock and the
//!   ability to start a buffer at a future clock time
//! - **InputContext**: the capture device running at the upstream rate
//! - **MicrophoneStream**: the live microphone tracks handed out by the input context

use crate::audio::capture::FramingSink;
use crate::audio::codec::AudioFrame;
use crate::config::AudioConfig;
use crate::error::LiveResult;
use async_trait::async_trait;

/// Factory for the per-session audio contexts.
#[async_trait]
pub trait AudioPlatform: Send + Sync {
    /// Open the playback context at `config.output_sample_rate`.
    async fn open_output(&self, config: &AudioConfig) -> LiveResult<Box<dyn OutputContext>>;

    /// Open the capture context at `config.input_sample_rate`.
    async fn open_input(&self, config: &AudioConfig) -> LiveResult<Box<dyn InputContext>>;
}

/// Playback device with its own clock.
#[async_trait]
pub trait OutputContext: Send {
    /// Make sure the device is running before anything is scheduled.
    async fn resume(&mut self) -> LiveResult<()>;

    /// Current output clock time in seconds. Monotonic; starts near zero.
    fn current_time(&self) -> f64;

    /// Play `frame` starting at clock time `start_at` (seconds).
    fn schedule(&mut self, frame: AudioFrame, start_at: f64) -> LiveResult<()>;

    /// Release the device. Calling it again is a no-op.
    async fn close(&mut self) -> LiveResult<()>;
}

/// Capture device context.
#[async_trait]
pub trait InputContext: Send {
    /// Rate the microphone samples are delivered at.
    fn sample_rate(&self) -> u32;

    /// Ask for the microphone.
    ///
    /// ## Errors:
    /// - `PermissionDenied` when access is refused or there is no microphone
    /// - `DeviceUnavailable` on hardware/driver failure
    async fn open_microphone(&mut self) -> LiveResult<Box<dyn MicrophoneStream>>;

    /// Release the context. Calling it again is a no-op.
    async fn close(&mut self) -> LiveResult<()>;
}

/// Live microphone tracks.
pub trait MicrophoneStream: Send {
    /// Start feeding samples into the framing processor's sink.
    fn connect(&mut self, sink: FramingSink) -> LiveResult<()>;

    /// Halt every track. Idempotent.
    fn stop_tracks(&mut self);
}
