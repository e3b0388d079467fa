//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` / `GEMINI_API_KEY` environment variables (deployment platforms)
//! 2. Environment variables (APP_SERVER_PORT, APP_LIVE_MODEL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Gemini Live BidiGenerateContent endpoint.
pub const DEFAULT_LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used by the live tutor.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Persona given to the model at session setup.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful Quran tutor. Listen to the user recite (or speak) and help them improve, or discuss verses. Be polite, encouraging, and respectful.";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, live session, audio)
/// keeps each concern easy to override from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
}

/// Server-specific configuration settings.
///
/// - `host = "127.0.0.1"`: Only accept connections from localhost (default;
///   the control API starts a microphone, so it should not be exposed casually)
/// - `port = 8080`: Common development port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote conversational endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// WebSocket URL of the Gemini Live endpoint (the API key is appended as `?key=`)
    pub endpoint_url: String,
    /// Model name without the `models/` prefix
    pub model: String,
    /// Prebuilt voice used for synthesized replies
    pub voice_name: String,
    /// System instruction sent in the setup message
    pub system_instruction: String,
    /// API key; empty means "read from the environment"
    #[serde(default)]
    pub api_key: String,
    /// Optional bound on the remote handshake. `None` keeps the historical
    /// behaviour where a stalled handshake stays at "Connecting..." forever.
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,
}

/// Audio pipeline settings.
///
/// ## Fields:
/// - `input_sample_rate`: rate of the capture windows sent upstream (16 kHz)
/// - `output_sample_rate`: rate of the synthesized frames coming back (24 kHz)
/// - `channels`: channel count of the frames coming back (mono)
/// - `capture_window`: samples per capture window (4096 ≈ 256ms at 16 kHz)
/// - `input_device` / `output_device`: device names; `None` picks the system default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u16,
    pub capture_window: usize,
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            channels: 1,
            capture_window: 4096,
            input_device: None,
            output_device: None,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_LIVE_ENDPOINT.to_string(),
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice_name: "Kore".to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            api_key: String::new(),
            handshake_timeout_ms: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            live: LiveConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl LiveConfig {
    /// Resolve the API key: explicit config first, then `GEMINI_API_KEY`, then `API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        env::var("GEMINI_API_KEY")
            .or_else(|_| env::var("API_KEY"))
            .ok()
            .filter(|key| !key.is_empty())
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_PORT=3000`: Override server port
    /// - `APP_LIVE_MODEL=...`: Use a different native-audio model
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    ///
    /// Multi-word keys (`capture_window`, `handshake_timeout_ms`) can't be
    /// reached through the `_` separator; set them in config.toml instead.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rates must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio channel count must be greater than 0"));
        }

        if self.audio.capture_window == 0 {
            return Err(anyhow::anyhow!("Capture window must be greater than 0"));
        }

        if self.live.endpoint_url.is_empty() || self.live.model.is_empty() {
            return Err(anyhow::anyhow!("Live endpoint URL and model must be set"));
        }

        if self.live.handshake_timeout_ms == Some(0) {
            return Err(anyhow::anyhow!("Handshake timeout must be greater than 0 when set"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Only the fields present in the JSON are touched, e.g.
    /// `{"audio": {"capture_window": 2048}}` changes just the window size.
    /// Changes take effect at the next session start.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(live) = partial_config.get("live") {
            if let Some(model) = live.get("model").and_then(|v| v.as_str()) {
                self.live.model = model.to_string();
            }
            if let Some(voice) = live.get("voice_name").and_then(|v| v.as_str()) {
                self.live.voice_name = voice.to_string();
            }
            if let Some(instruction) = live.get("system_instruction").and_then(|v| v.as_str()) {
                self.live.system_instruction = instruction.to_string();
            }
            if let Some(timeout) = live.get("handshake_timeout_ms") {
                self.live.handshake_timeout_ms = timeout.as_u64();
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(window) = audio.get("capture_window").and_then(|v| v.as_u64()) {
                self.audio.capture_window = window as usize;
            }
            if let Some(name) = audio.get("input_device") {
                self.audio.input_device = name.as_str().map(str::to_string);
            }
            if let Some(name) = audio.get("output_device") {
                self.audio.output_device = name.as_str().map(str::to_string);
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.audio.output_sample_rate, 24000);
        assert_eq!(config.audio.capture_window, 4096);
        assert_eq!(config.live.voice_name, "Kore");
        assert!(config.live.handshake_timeout_ms.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.capture_window = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.live.handshake_timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"capture_window": 2048}, "live": {"handshake_timeout_ms": 5000}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.audio.capture_window, 2048);
        assert_eq!(config.live.handshake_timeout_ms, Some(5000));
        // Untouched fields keep their values
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.live.model, DEFAULT_LIVE_MODEL);
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"capture_window": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_config_update_rejects_port_out_of_range() {
        let mut config = AppConfig::default();
        let err = config
            .update_from_json(r#"{"server": {"port": 65537}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert_eq!(config.server.port, 8080);

        assert!(config.update_from_json(r#"{"server": {"port": 9000}}"#).is_ok());
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let live = LiveConfig {
            api_key: "from-config".to_string(),
            ..LiveConfig::default()
        };
        assert_eq!(live.resolved_api_key().as_deref(), Some("from-config"));
    }
}
