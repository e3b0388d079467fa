//! # Live Session WebSocket
//!
//! `GET /ws/live` upgrades to a WebSocket that mirrors the live session
//! status and accepts start/stop commands.
//!
//! ## WebSocket Protocol:
//! - **Client → Server**: `{"type":"start"}`, `{"type":"stop"}`,
//!   `{"type":"ping","timestamp":...}`, `{"type":"pong","timestamp":...}`
//! - **Server → Client**: `{"type":"status", ...SessionStatus}` on connect and
//!   on every state change, `pong` replies, periodic `ping` heartbeats and
//!   `{"type":"error","code":...,"message":...}`
//!
//! Closing the socket does not stop the session; any client can stop it.

use crate::live::SessionStatus;
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages accepted from the client.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Start,
    Stop,
    Ping {
        #[serde(default)]
        timestamp: u64,
    },
    Pong {
        #[serde(default)]
        timestamp: u64,
    },
}

/// Messages pushed to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status {
        #[serde(flatten)]
        status: SessionStatus,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One connected status client.
pub struct LiveStatusSocket {
    state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl LiveStatusSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to encode WebSocket message: {}", e),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!("WebSocket error {}: {}", code, message);
        self.send(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn handle_client_message(&mut self, message: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message {
            ClientMessage::Start => {
                let state = self.state.clone();
                let addr = ctx.address();
                let config = state.session_config();

                tokio::spawn(async move {
                    let result = state.live.start(config).await;
                    state.record_session_start(result.is_ok());
                    if let Err(e) = result {
                        addr.do_send(SendError {
                            code: e.code(),
                            message: e.to_string(),
                        });
                    }
                });
            }
            ClientMessage::Stop => {
                let state = self.state.clone();
                let addr = ctx.address();

                tokio::spawn(async move {
                    if let Err(e) = state.live.stop().await {
                        addr.do_send(SendError {
                            code: e.code(),
                            message: e.to_string(),
                        });
                    }
                });
            }
            ClientMessage::Ping { timestamp } => {
                self.last_heartbeat = Instant::now();
                self.send(ctx, &ServerMessage::Pong { timestamp });
            }
            ClientMessage::Pong { .. } => {
                self.last_heartbeat = Instant::now();
            }
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct SendError {
    code: &'static str,
    message: String,
}

impl Handler<SendError> for LiveStatusSocket {
    type Result = ();

    fn handle(&mut self, msg: SendError, ctx: &mut Self::Context) {
        self.send_error(ctx, msg.code, &msg.message);
    }
}

impl Actor for LiveStatusSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Live status WebSocket connected");

        // First item is the current status, then every change
        ctx.add_stream(WatchStream::new(self.state.live.subscribe()));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            act.send(ctx, &ServerMessage::Ping { timestamp: now_millis() });
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Live status WebSocket disconnected");
    }
}

/// Status changes from the controller.
impl StreamHandler<SessionStatus> for LiveStatusSocket {
    fn handle(&mut self, status: SessionStatus, ctx: &mut Self::Context) {
        debug!("Pushing status {} to WebSocket client", status.state.as_str());
        self.send(ctx, &ServerMessage::Status { status });
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        warn!("Live session controller went away, closing WebSocket");
        ctx.stop();
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveStatusSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => self.handle_client_message(message, ctx),
                Err(err) => self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err)),
            },
            Ok(ws::Message::Binary(_)) => {
                self.send_error(ctx, "unsupported", "binary frames are not accepted");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// HTTP → WebSocket upgrade for `/ws/live`.
pub async fn live_status_socket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New live status WebSocket from {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(LiveStatusSocket::new(state), &req, stream)
}
