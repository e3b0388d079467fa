//! # Gemini Live Client
//!
//! WebSocket client for the Gemini Live `BidiGenerateContent` endpoint.
//!
//! ## Protocol:
//! 1. **Connect** to the endpoint with the API key as a query parameter
//! 2. **Setup**: send the setup message (model, audio modality, voice, persona)
//! 3. **Wait** for `setupComplete`; only then is the session considered open
//! 4. **Stream**: capture windows go out as `realtimeInput.mediaChunks`;
//!    replies arrive as `serverContent.modelTurn.parts[].inlineData`
//!
//! The server may send JSON in Binary frames as well as Text frames; both
//! are handled.
//!
//! ## Tasks:
//! After the handshake the socket is split. A writer task drains an outbound
//! queue; a reader task turns server frames into `SessionEvent`s.

use crate::audio::codec::TransportEnvelope;
use crate::config::LiveConfig;
use crate::error::{LiveError, LiveResult};
use crate::live::events::{EventSender, SessionEvent};
use crate::live::transport::{LiveConnector, SessionHandle};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close()` waits for the close frame to be flushed.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Mime type assumed for inline audio that arrives without one.
const DEFAULT_REPLY_MIME: &str = "audio/pcm";

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Build the first message of a session from the live config.
pub fn build_setup_message(config: &LiveConfig) -> SetupMessage {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<TransportEnvelope>,
}

pub fn build_realtime_input(envelope: TransportEnvelope) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![envelope],
        },
    }
}

/// What one server frame means to us.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    Audio(TransportEnvelope),
    TurnComplete,
    Interrupted,
    Error(String),
}

/// Parse one JSON server frame. A frame can carry several events.
///
/// A frame that is not JSON yields nothing; it is logged and skipped so one bad
/// frame never ends the session.
pub fn parse_server_message(json_text: &str) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring unparseable server message: {}", e);
            return events;
        }
    };

    if value.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = value.get("serverContent") {
        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(|v| v.as_array()) {
            for inline in parts.iter().filter_map(|part| part.get("inlineData")) {
                if let Some(data) = inline.get("data").and_then(|v| v.as_str()) {
                    let mime_type = inline
                        .get("mimeType")
                        .and_then(|v| v.as_str())
                        .unwrap_or(DEFAULT_REPLY_MIME);
                    events.push(ServerEvent::Audio(TransportEnvelope {
                        mime_type: mime_type.to_string(),
                        data: data.to_string(),
                    }));
                }
            }
        }

        if content.get("interrupted").and_then(|v| v.as_bool()) == Some(true) {
            events.push(ServerEvent::Interrupted);
        }
        if content.get("turnComplete").and_then(|v| v.as_bool()) == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown server error");
        events.push(ServerEvent::Error(message.to_string()));
    }

    events
}

/// Session events carried by one server frame. Control signals are only logged.
pub fn session_events(json_text: &str) -> Vec<SessionEvent> {
    parse_server_message(json_text)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Audio(envelope) => Some(SessionEvent::RemoteAudio(envelope)),
            ServerEvent::Error(msg) => {
                warn!("Live endpoint reported an error: {}", msg);
                Some(SessionEvent::RemoteError(msg))
            }
            other => {
                debug!("Live endpoint: {:?}", other);
                None
            }
        })
        .collect()
}

/// JSON text carried by a frame, whether it came as Text or Binary.
fn frame_text(message: &Message) -> Option<&str> {
    match message {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

/// Connector for the Gemini Live API.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiConnector;

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(&self, config: &LiveConfig, events: EventSender) -> LiveResult<Box<dyn SessionHandle>> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            LiveError::ConnectionFailed("no API key configured (set GEMINI_API_KEY)".to_string())
        })?;

        info!("Connecting to live endpoint {} (model {})", config.endpoint_url, config.model);

        let url = format!("{}?key={}", config.endpoint_url, api_key);
        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        let setup = serde_json::to_string(&build_setup_message(config))
            .map_err(|e| LiveError::ConnectionFailed(format!("setup encoding failed: {}", e)))?;
        ws.send(Message::Text(setup))
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        wait_for_setup(&mut ws).await?;
        info!("Live session open");

        let (sink, stream) = ws.split();
        let open = Arc::new(AtomicBool::new(true));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(outbound_loop(sink, outbound_rx, Arc::clone(&open)));
        let reader = tokio::spawn(inbound_loop(stream, events, Arc::clone(&open)));

        Ok(Box::new(GeminiSession {
            outbound: outbound_tx,
            open,
            writer: Some(writer),
            reader: Some(reader),
        }))
    }
}

async fn wait_for_setup(ws: &mut WsStream) -> LiveResult<()> {
    while let Some(frame) = ws.next().await {
        let message = frame.map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        if let Message::Close(close) = &message {
            return Err(LiveError::ConnectionFailed(format!(
                "closed before setup completed: {:?}",
                close
            )));
        }

        if let Some(text) = frame_text(&message) {
            for event in parse_server_message(text) {
                match event {
                    ServerEvent::SetupComplete => return Ok(()),
                    ServerEvent::Error(msg) => return Err(LiveError::ConnectionFailed(msg)),
                    other => debug!("Ignoring {:?} before setup completed", other),
                }
            }
        }
    }

    Err(LiveError::ConnectionFailed("stream ended before setup completed".to_string()))
}

enum Outbound {
    Audio(TransportEnvelope),
    Close,
}

async fn outbound_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Audio(envelope) => {
                let json = match serde_json::to_string(&build_realtime_input(envelope)) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode realtime input: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    warn!("Live socket send failed: {}", e);
                    open.store(false, Ordering::Release);
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                break;
            }
        }
    }

    debug!("Outbound loop terminated");
}

async fn inbound_loop(mut stream: SplitStream<WsStream>, events: EventSender, open: Arc<AtomicBool>) {
    let mut ended = SessionEvent::RemoteClosed;

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                warn!("Live socket error: {}", e);
                ended = SessionEvent::RemoteError(e.to_string());
                break;
            }
        };

        if let Message::Close(close) = &message {
            info!("Live endpoint closed the session: {:?}", close);
            break;
        }

        let Some(text) = frame_text(&message) else {
            continue;
        };

        for event in session_events(text) {
            if events.send(event).is_err() {
                debug!("Session event receiver dropped, closing inbound loop");
                open.store(false, Ordering::Release);
                return;
            }
        }
    }

    open.store(false, Ordering::Release);
    let _ = events.send(ended);
}

/// Open Gemini Live session.
pub struct GeminiSession {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl SessionHandle for GeminiSession {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send_realtime_input(&mut self, envelope: TransportEnvelope) -> LiveResult<()> {
        if !self.is_open() {
            return Err(LiveError::RemoteClosed);
        }
        self.outbound
            .send(Outbound::Audio(envelope))
            .map_err(|_| LiveError::RemoteClosed)
    }

    async fn close(&mut self) -> LiveResult<()> {
        self.open.store(false, Ordering::Release);

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if let Some(writer) = self.writer.take() {
            let _ = self.outbound.send(Outbound::Close);
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
                warn!("Timed out flushing live session close");
            }
            info!("Live session closed");
        }

        Ok(())
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec;

    #[test]
    fn test_setup_message_shape() {
        let json = serde_json::to_value(build_setup_message(&LiveConfig::default())).unwrap();
        let setup = &json["setup"];

        assert_eq!(
            setup["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert!(setup["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Quran tutor"));
    }

    #[test]
    fn test_model_prefix_not_duplicated() {
        let config = LiveConfig {
            model: "models/custom".to_string(),
            ..LiveConfig::default()
        };
        assert_eq!(build_setup_message(&config).setup.model, "models/custom");
    }

    #[test]
    fn test_realtime_input_shape() {
        let envelope = codec::encode(&[0.0, 0.5]);
        let json = serde_json::to_value(build_realtime_input(envelope.clone())).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];

        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], envelope.data.as_str());
    }

    #[test]
    fn test_parse_setup_complete() {
        assert_eq!(
            parse_server_message(r#"{"setupComplete":{}}"#),
            vec![ServerEvent::SetupComplete]
        );
    }

    #[test]
    fn test_parse_model_turn_audio() {
        let text = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}},
            {"text":"ignored"},
            {"inlineData":{"data":"AQA="}}
        ]},"turnComplete":true}}"#;

        let events = parse_server_message(text);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            ServerEvent::Audio(TransportEnvelope {
                mime_type: "audio/pcm;rate=24000".to_string(),
                data: "AAA=".to_string(),
            })
        );
        assert!(matches!(&events[1], ServerEvent::Audio(env) if env.mime_type == "audio/pcm"));
        assert_eq!(events[2], ServerEvent::TurnComplete);
    }

    #[test]
    fn test_parse_error_and_garbage() {
        let events = parse_server_message(r#"{"error":{"message":"quota exceeded"}}"#);
        assert_eq!(events, vec![ServerEvent::Error("quota exceeded".to_string())]);

        assert!(parse_server_message("not json").is_empty());
        assert!(parse_server_message("{not json").is_empty());
    }

    #[test]
    fn test_session_events_keep_audio_and_errors_only() {
        let text = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}
        ]},"turnComplete":true}}"#;
        let events = session_events(text);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SessionEvent::RemoteAudio(env) if env.data == "AAA="));

        assert_eq!(
            session_events(r#"{"error":{"message":"quota exceeded"}}"#),
            vec![SessionEvent::RemoteError("quota exceeded".to_string())]
        );
        assert!(session_events("{not json").is_empty());
    }

    #[test]
    fn test_frame_text_accepts_binary_json() {
        let binary = Message::Binary(br#"{"setupComplete":{}}"#.to_vec());
        assert_eq!(frame_text(&binary), Some(r#"{"setupComplete":{}}"#));

        let raw = Message::Binary(vec![0x00, 0x01]);
        assert_eq!(frame_text(&raw), None);
    }

    #[tokio::test]
    async fn test_connect_without_api_key_fails() {
        let config = LiveConfig {
            api_key: String::new(),
            endpoint_url: "ws://127.0.0.1:9".to_string(),
            ..LiveConfig::default()
        };
        if config.resolved_api_key().is_some() {
            // Key present in the environment; nothing to check
            return;
        }
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = GeminiConnector.connect(&config, tx).await;
        assert!(matches!(result, Err(LiveError::ConnectionFailed(_))));
    }
}
