//! # Live Session Controller
//!
//! Owns every resource of a live session and drives its lifecycle:
//!
//! ```text
//! start():  output context → resume → input context → microphone + framing
//!           → remote session (open once setup completes) → Active
//! stop():   microphone tracks → framing processor → input context
//!           → output context → remote session → Idle
//! ```
//!
//! ## Concurrency model:
//! The controller runs as a single task (`run`). Commands from the HTTP and
//! WebSocket surface arrive on one channel, device and remote notifications
//! on another, and both are handled one at a time, so a teardown can never
//! interleave with another teardown or with frame handling.
//!
//! A stop requested while `start()` is still acquiring resources sets a
//! shared flag. `start()` checks it after each acquisition and releases
//! whatever it already holds, so late arrivals never leak.
//!
//! ## Error handling:
//! Acquisition failures end in a status update ("Failed to connect...") and
//! a full release; they are not returned to the caller. The only error
//! `start()` reports is `SessionAlreadyActive`.

use crate::audio::capture::{CapturePipeline, CaptureResources};
use crate::audio::codec;
use crate::audio::platform::{AudioPlatform, InputContext};
use crate::audio::playback::PlaybackScheduler;
use crate::error::{LiveError, LiveResult};
use crate::live::events::{ControlCommand, EventReceiver, EventSender, SessionConfig, SessionEvent};
use crate::live::status::{self, SessionState, SessionStatus};
use crate::live::transport::{LiveConnector, SessionHandle};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a session is being torn down; decides the final status message.
#[derive(Debug)]
enum StopReason {
    /// The user asked for it (also covers a stop during Connecting)
    User,
    /// The remote side closed or errored
    RemoteEnded,
    /// Acquisition failed before the session became active
    ConnectFailed(LiveError),
    /// A device failed while the session was active
    DeviceFailed(LiveError),
}

impl StopReason {
    fn message(&self) -> String {
        match self {
            StopReason::User => status::MSG_STOPPED.to_string(),
            StopReason::RemoteEnded => status::MSG_ENDED.to_string(),
            StopReason::ConnectFailed(LiveError::ConnectionFailed(_)) => status::MSG_FAILED.to_string(),
            StopReason::ConnectFailed(err) => format!("{}: {}", status::MSG_FAILED, err),
            StopReason::DeviceFailed(err) => format!("Session ended: {}", err),
        }
    }
}

/// Outcome of one acquisition step.
enum Acquire {
    Cancelled,
    Failed(LiveError),
}

impl From<LiveError> for Acquire {
    fn from(err: LiveError) -> Self {
        Acquire::Failed(err)
    }
}

/// The session state machine. Use [`LiveSessionController::spawn`] in the
/// application; tests drive it directly.
pub struct LiveSessionController {
    platform: Arc<dyn AudioPlatform>,
    connector: Arc<dyn LiveConnector>,

    state: SessionState,
    status_tx: watch::Sender<SessionStatus>,
    stop_requested: Arc<AtomicBool>,

    events_tx: EventSender,
    events_rx: EventReceiver,

    // Session resources, in acquisition order
    playback: Option<PlaybackScheduler>,
    input: Option<Box<dyn InputContext>>,
    capture: Option<CaptureResources>,
    session: Option<Box<dyn SessionHandle>>,

    frames_sent: u64,
}

impl LiveSessionController {
    pub fn new(platform: Arc<dyn AudioPlatform>, connector: Arc<dyn LiveConnector>) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            platform,
            connector,
            state: SessionState::Idle,
            status_tx,
            stop_requested: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx,
            playback: None,
            input: None,
            capture: None,
            session: None,
            frames_sent: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Flag that aborts an in-flight `start()` at its next checkpoint.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    /// Move the controller onto its own task and return a handle to it.
    pub fn spawn(self) -> ControllerHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = ControllerHandle {
            commands: commands_tx,
            status: self.subscribe(),
            stop_requested: self.stop_flag(),
        };

        tokio::spawn(self.run(commands_rx));
        handle
    }

    /// Serve commands and session events until every handle is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ControlCommand>) {
        info!("Live session controller started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }

        self.stop().await;
        info!("Live session controller stopped");
    }

    async fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Start { config, reply } => {
                if self.state != SessionState::Idle {
                    warn!("Start requested while {}", self.state.as_str());
                    let _ = reply.send(Err(LiveError::SessionAlreadyActive));
                    return;
                }
                let _ = reply.send(Ok(()));
                if let Err(e) = self.start(&config).await {
                    warn!("Start rejected: {}", e);
                }
            }
            ControlCommand::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
        }
    }

    /// Acquire every resource and open the remote session.
    ///
    /// ## Errors:
    /// `SessionAlreadyActive` if the controller is not idle. Every other
    /// failure is reported through the status and leaves the controller idle.
    pub async fn start(&mut self, config: &SessionConfig) -> LiveResult<()> {
        if self.state != SessionState::Idle {
            return Err(LiveError::SessionAlreadyActive);
        }

        self.stop_requested.store(false, Ordering::Release);

        // Fresh channel: stragglers from the previous session land in the old one
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;
        self.frames_sent = 0;

        let session_id = Uuid::new_v4().to_string();
        info!("Starting live session {}", session_id);

        self.state = SessionState::Connecting;
        self.status_tx.send_replace(SessionStatus {
            state: SessionState::Connecting,
            message: status::MSG_CONNECTING.to_string(),
            is_active: false,
            session_id: Some(session_id.clone()),
            started_at: None,
            frames_sent: 0,
            frames_played: 0,
            frames_dropped: 0,
        });

        match self.acquire(config).await {
            Ok(()) => {
                self.state = SessionState::Active;
                self.status_tx.send_modify(|status| {
                    status.state = SessionState::Active;
                    status.message = status::MSG_ACTIVE.to_string();
                    status.is_active = true;
                    status.started_at = Some(Utc::now());
                });
                info!("Live session {} active", session_id);
            }
            Err(Acquire::Cancelled) => {
                info!("Stop requested while connecting; releasing live session {}", session_id);
                self.teardown(StopReason::User).await;
            }
            Err(Acquire::Failed(err)) => {
                error!("Live session {} failed to start: {}", session_id, err);
                self.teardown(StopReason::ConnectFailed(err)).await;
            }
        }

        Ok(())
    }

    fn checkpoint(&self) -> Result<(), Acquire> {
        if self.stop_requested.load(Ordering::Acquire) {
            Err(Acquire::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Each resource is stored before the next step runs so teardown can
    /// release it whatever happens afterwards.
    async fn acquire(&mut self, config: &SessionConfig) -> Result<(), Acquire> {
        let output = self.platform.open_output(&config.audio).await?;
        let playback = self.playback.insert(PlaybackScheduler::new(
            output,
            config.audio.output_sample_rate,
            config.audio.channels,
        ));
        playback.resume().await?;
        self.checkpoint()?;

        let input = self.platform.open_input(&config.audio).await?;
        self.input = Some(input);
        self.checkpoint()?;

        let Some(input) = self.input.as_mut() else {
            return Err(Acquire::Cancelled);
        };
        let capture = CapturePipeline::start(
            &mut **input,
            config.audio.capture_window,
            self.events_tx.clone(),
        )
        .await?;
        self.capture = Some(capture);
        self.checkpoint()?;

        let session = open_remote(Arc::clone(&self.connector), config, self.events_tx.clone()).await?;
        self.session = Some(session);
        self.checkpoint()?;

        Ok(())
    }

    /// End the current session. A no-op when idle.
    pub async fn stop(&mut self) {
        if self.state == SessionState::Idle {
            debug!("Stop requested with no active session");
            return;
        }
        self.teardown(StopReason::User).await;
    }

    async fn teardown(&mut self, reason: StopReason) {
        self.state = SessionState::Stopping;
        self.status_tx.send_modify(|status| {
            status.state = SessionState::Stopping;
            status.message = status::MSG_STOPPING.to_string();
            status.is_active = false;
        });

        self.release_resources().await;

        let message = reason.message();
        info!("Live session ended: {}", message);

        self.state = SessionState::Idle;
        self.status_tx.send_modify(|status| {
            status.state = SessionState::Idle;
            status.message = message;
            status.is_active = false;
        });
    }

    async fn release_resources(&mut self) {
        if let Some(capture) = self.capture.as_mut() {
            capture.stop_tracks();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.disconnect();
        }

        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.close().await {
                warn!("Failed to close input context: {}", e);
            }
        }

        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.close().await {
                warn!("Failed to close output context: {}", e);
            }
        }

        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("Failed to close remote session: {}", e);
            }
        }
    }

    /// Handle one device or remote notification.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        if self.state != SessionState::Active {
            debug!("Dropping {:?} while {}", event_kind(&event), self.state.as_str());
            return;
        }

        match event {
            SessionEvent::CaptureWindow(samples) => self.forward_capture(&samples).await,
            SessionEvent::RemoteAudio(envelope) => self.play_remote(&envelope),
            SessionEvent::CaptureFailed(msg) => {
                error!("Microphone failed: {}", msg);
                self.teardown(StopReason::DeviceFailed(LiveError::DeviceUnavailable(msg)))
                    .await;
            }
            SessionEvent::RemoteClosed => {
                info!("Remote session closed");
                self.teardown(StopReason::RemoteEnded).await;
            }
            SessionEvent::RemoteError(msg) => {
                warn!("Remote session error: {}", msg);
                self.teardown(StopReason::RemoteEnded).await;
            }
        }
    }

    async fn forward_capture(&mut self, samples: &[f32]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.is_open() {
            return;
        }

        let envelope = codec::encode(samples);
        match session.send_realtime_input(envelope).await {
            Ok(()) => {
                self.frames_sent += 1;
                let sent = self.frames_sent;
                // Counters are read on demand; no need to wake subscribers
                self.status_tx.send_if_modified(|status| {
                    status.frames_sent = sent;
                    false
                });
            }
            Err(e) => {
                warn!("Failed to send capture window: {}", e);
                self.teardown(StopReason::RemoteEnded).await;
            }
        }
    }

    fn play_remote(&mut self, envelope: &codec::TransportEnvelope) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };

        if let Err(e) = playback.enqueue_envelope(envelope) {
            // Decode errors are already logged and counted by the scheduler
            if !matches!(e, LiveError::DecodeError(_)) {
                warn!("Failed to schedule remote audio: {}", e);
            }
        }

        let (played, dropped) = (playback.frames_played(), playback.frames_dropped());
        self.status_tx.send_if_modified(|status| {
            status.frames_played = played;
            status.frames_dropped = dropped;
            false
        });
    }

    /// Handle every event already queued. Tests use this instead of `run`.
    pub async fn pump(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
        }
    }
}

/// Open the remote session, bounded by the optional handshake timeout.
async fn open_remote(
    connector: Arc<dyn LiveConnector>,
    config: &SessionConfig,
    events: EventSender,
) -> LiveResult<Box<dyn SessionHandle>> {
    let connect = connector.connect(&config.live, events);

    match config.live.handshake_timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), connect)
            .await
            .map_err(|_| LiveError::ConnectionFailed(format!("handshake timed out after {}ms", ms)))?,
        None => connect.await,
    }
}

fn event_kind(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::CaptureWindow(_) => "capture window",
        SessionEvent::CaptureFailed(_) => "capture failure",
        SessionEvent::RemoteAudio(_) => "remote audio",
        SessionEvent::RemoteClosed => "remote close",
        SessionEvent::RemoteError(_) => "remote error",
    }
}

/// Cloneable handle used by the HTTP and WebSocket surface.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    status: watch::Receiver<SessionStatus>,
    stop_requested: Arc<AtomicBool>,
}

impl ControllerHandle {
    /// Ask the controller to start a session.
    ///
    /// Resolves once the request is accepted; progress is visible through
    /// [`status`](Self::status) and [`subscribe`](Self::subscribe).
    pub async fn start(&self, config: SessionConfig) -> LiveResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ControlCommand::Start { config, reply })
            .map_err(|_| controller_gone())?;
        response.await.map_err(|_| controller_gone())?
    }

    /// Request a stop without waiting for it. An in-flight start is aborted
    /// at its next checkpoint.
    pub fn request_stop(&self) -> LiveResult<oneshot::Receiver<()>> {
        self.stop_requested.store(true, Ordering::Release);
        let (reply, done) = oneshot::channel();
        self.commands
            .send(ControlCommand::Stop { reply })
            .map_err(|_| controller_gone())?;
        Ok(done)
    }

    /// Stop the session and wait until every resource is released.
    pub async fn stop(&self) -> LiveResult<()> {
        let done = self.request_stop()?;
        done.await.map_err(|_| controller_gone())
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }
}

fn controller_gone() -> LiveError {
    LiveError::DeviceUnavailable("live session controller is not running".to_string())
}
