//! # Live Session Module
//!
//! Bridges the local audio devices to a remote conversational model.
//!
//! ## Key Components:
//! - **Controller**: the session state machine and owner of every resource
//! - **Events**: device/remote notifications and control commands
//! - **Status**: observable session state and user-facing messages
//! - **Transport**: traits over the remote session
//! - **Gemini**: the Gemini Live WebSocket implementation of the transport

pub mod controller;
pub mod events;
pub mod gemini;
pub mod status;
pub mod transport;

pub use controller::{ControllerHandle, LiveSessionController};
pub use events::{SessionConfig, SessionEvent};
pub use status::{SessionState, SessionStatus};
