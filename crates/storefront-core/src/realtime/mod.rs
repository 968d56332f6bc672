//! Realtime chat over a WebSocket.
//!
//! - `frames`: outbound actions and inbound frame classification
//! - `conversation`: the local contact list and conversation view
//! - `session`: connection lifecycle and the reader/writer tasks

pub mod conversation;
pub mod frames;
pub mod session;

pub use conversation::{ChatState, FrameOutcome};
pub use frames::{ClientAction, ServerFrame};
pub use session::{ConnectionState, RealtimeError, RealtimeSession, SessionEvent};
