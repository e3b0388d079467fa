//! # Session Status
//!
//! The observable state of the live session: a state enum plus the
//! human-readable message shown to the user.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const MSG_READY: &str = "Ready to start session";
pub const MSG_CONNECTING: &str = "Connecting...";
pub const MSG_ACTIVE: &str = "Live Session Active";
pub const MSG_STOPPING: &str = "Stopping...";
pub const MSG_STOPPED: &str = "Session Stopped";
pub const MSG_ENDED: &str = "Session ended.";
pub const MSG_FAILED: &str = "Failed to connect";

/// Lifecycle states.
///
/// ```text
/// Idle → Connecting → Active → Stopping → Idle
///             └──────────(failure / stop)──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Snapshot published on every state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub message: String,
    /// True only while `state == Active`
    pub is_active: bool,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub frames_sent: u64,
    pub frames_played: u64,
    pub frames_dropped: u64,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            message: MSG_READY.to_string(),
            is_active: false,
            session_id: None,
            started_at: None,
            frames_sent: 0,
            frames_played: 0,
            frames_dropped: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status() {
        let status = SessionStatus::default();
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.message, "Ready to start session");
        assert!(!status.is_active);
    }

    #[test]
    fn test_status_serializes_lowercase_state() {
        let json = serde_json::to_value(SessionStatus::default()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["is_active"], false);
    }
}
