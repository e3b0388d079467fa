//! Messages flowing into the live session controller.

use crate::audio::codec::TransportEnvelope;
use crate::config::{AudioConfig, AppConfig, LiveConfig};
use crate::error::LiveResult;
use tokio::sync::{mpsc, oneshot};

/// Asynchronous notifications from the audio devices and the remote session.
///
/// Each session gets a fresh channel, so notifications from a session that
/// has already been torn down never reach the next one.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One full capture window of float samples (channel 0, upstream rate)
    CaptureWindow(Vec<f32>),
    /// The microphone stream failed while running
    CaptureFailed(String),
    /// One audio payload from the remote model turn
    RemoteAudio(TransportEnvelope),
    /// The remote side closed the connection
    RemoteClosed,
    /// Transport-level error on the remote connection
    RemoteError(String),
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Settings captured at the moment a session starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub audio: AudioConfig,
    pub live: LiveConfig,
}

impl From<&AppConfig> for SessionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            audio: config.audio.clone(),
            live: config.live.clone(),
        }
    }
}

/// Requests from the HTTP/WebSocket surface to the controller task.
#[derive(Debug)]
pub enum ControlCommand {
    /// Answered as soon as the start is accepted or rejected, before any
    /// device is acquired
    Start {
        config: SessionConfig,
        reply: oneshot::Sender<LiveResult<()>>,
    },
    /// Answered once the session is fully released (or was already idle)
    Stop { reply: oneshot::Sender<()> },
}
