//! # Remote Session Transport
//!
//! The seam between the controller and the remote conversational service.
//! `crate::live::gemini` implements it over a WebSocket; tests use a
//! recording fake.

use crate::audio::codec::TransportEnvelope;
use crate::config::LiveConfig;
use crate::error::LiveResult;
use crate::live::events::EventSender;
use async_trait::async_trait;

/// Opens remote sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open a session and resolve once the remote side reports it is open.
    ///
    /// After this returns, incoming audio, closes and errors are delivered on
    /// `events` as `RemoteAudio`, `RemoteClosed` and `RemoteError`.
    ///
    /// ## Errors:
    /// `ConnectionFailed` when the connection or the setup handshake fails.
    async fn connect(&self, config: &LiveConfig, events: EventSender) -> LiveResult<Box<dyn SessionHandle>>;
}

/// An open remote session.
#[async_trait]
pub trait SessionHandle: Send {
    fn is_open(&self) -> bool;

    /// Send one capture window upstream.
    async fn send_realtime_input(&mut self, envelope: TransportEnvelope) -> LiveResult<()>;

    /// Close the session. Idempotent.
    async fn close(&mut self) -> LiveResult<()>;
}
