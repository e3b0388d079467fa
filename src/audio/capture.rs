//! # Capture Pipeline
//!
//! Turns the live microphone into a sequence of fixed-size windows of float
//! samples, handed to the live controller as `SessionEvent::CaptureWindow`.
//!
//! ## Pieces:
//! - **WindowFramer**: accumulates device callback chunks into fixed windows
//! - **FramingSink**: the end the microphone writes into (lives on the audio thread)
//! - **FramingProcessor**: the controller's handle on the sink; disconnecting it
//!   stops delivery immediately
//! - **CaptureResources**: everything `CapturePipeline::start` acquired, released
//!   in the order "stop tracks, then disconnect"
//!
//! ## Rust Concepts Used:
//! - **Arc<AtomicBool>**: one flag shared between the audio thread and the controller,
//!   readable without locking from the real-time callback
//! - **Option::take()**: makes every release step idempotent

use crate::audio::platform::{InputContext, MicrophoneStream};
use crate::error::{LiveError, LiveResult};
use crate::live::events::{EventSender, SessionEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Groups arbitrary-sized sample chunks into windows of exactly `window_size`.
///
/// Leftover samples stay pending until the next push.
#[derive(Debug)]
pub struct WindowFramer {
    window_size: usize,
    pending: Vec<f32>,
}

impl WindowFramer {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            pending: Vec::with_capacity(window_size),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Samples waiting for the next full window.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Add a chunk and return every window it completes, oldest first.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut windows = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let needed = self.window_size - self.pending.len();
            let take = needed.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.window_size {
                let window = std::mem::replace(&mut self.pending, Vec::with_capacity(self.window_size));
                windows.push(window);
            }
        }

        windows
    }
}

/// Receiving end of the framing processor.
///
/// Owned by whatever drives the microphone (the cpal callback in production).
/// Once the processor is disconnected, or the controller's event channel is
/// gone, pushes are silently ignored.
pub struct FramingSink {
    framer: WindowFramer,
    events: EventSender,
    connected: Arc<AtomicBool>,
}

impl FramingSink {
    /// Feed microphone samples (channel 0, already at the upstream rate).
    pub fn push(&mut self, samples: &[f32]) {
        if !self.connected.load(Ordering::Acquire) {
            return;
        }

        for window in self.framer.push(samples) {
            if self.events.send(SessionEvent::CaptureWindow(window)).is_err() {
                // Controller went away; nothing downstream anymore
                self.connected.store(false, Ordering::Release);
                return;
            }
        }
    }

    /// Report a device fault from the audio thread.
    pub fn report_error(&self, message: impl Into<String>) {
        if !self.connected.load(Ordering::Acquire) {
            return;
        }
        let _ = self.events.send(SessionEvent::CaptureFailed(message.into()));
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Controller-side handle on the framing stage.
#[derive(Debug)]
pub struct FramingProcessor {
    connected: Arc<AtomicBool>,
    window_size: usize,
}

impl FramingProcessor {
    /// Create a connected processor/sink pair.
    pub fn new(window_size: usize, events: EventSender) -> (Self, FramingSink) {
        let connected = Arc::new(AtomicBool::new(true));
        let framer = WindowFramer::new(window_size);
        let window_size = framer.window_size();

        let sink = FramingSink {
            framer,
            events,
            connected: Arc::clone(&connected),
        };

        (Self { connected, window_size }, sink)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Stop window delivery. No window is emitted after this returns.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            debug!("Framing processor disconnected");
        }
    }
}

/// Everything a running capture pipeline holds.
pub struct CaptureResources {
    stream: Option<Box<dyn MicrophoneStream>>,
    processor: Option<FramingProcessor>,
}

impl CaptureResources {
    /// Halt the microphone tracks. Safe to call more than once.
    pub fn stop_tracks(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            debug!("Microphone tracks stopped");
        }
    }

    /// Disconnect the framing processor. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if let Some(processor) = self.processor.take() {
            processor.disconnect();
        }
    }

    /// Release in capture order: tracks first, then the processor.
    pub fn release(&mut self) {
        self.stop_tracks();
        self.disconnect();
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none() && self.processor.is_none()
    }
}

impl Drop for CaptureResources {
    fn drop(&mut self) {
        self.release();
    }
}

/// Entry point for starting microphone capture.
pub struct CapturePipeline;

impl CapturePipeline {
    /// Acquire the microphone from `input` and wire it to a framing processor
    /// that emits `window_size`-sample windows on `events`.
    ///
    /// ## Errors:
    /// - `PermissionDenied` if the microphone is refused
    /// - `DeviceUnavailable` if the stream can't be wired up; the tracks that
    ///   were already acquired are stopped before returning
    pub async fn start(
        input: &mut dyn InputContext,
        window_size: usize,
        events: EventSender,
    ) -> LiveResult<CaptureResources> {
        if window_size == 0 {
            return Err(LiveError::DeviceUnavailable(
                "capture window must hold at least one sample".to_string(),
            ));
        }

        let mut stream = input.open_microphone().await?;
        let (processor, sink) = FramingProcessor::new(window_size, events);

        if let Err(e) = stream.connect(sink) {
            warn!("Failed to connect microphone to framing processor: {}", e);
            stream.stop_tracks();
            processor.disconnect();
            return Err(e);
        }

        info!(
            "Capture started: {} samples per window at {} Hz",
            window_size,
            input.sample_rate()
        );

        Ok(CaptureResources {
            stream: Some(stream),
            processor: Some(processor),
        })
    }
}
