//! Transport layer for the chat presentation layer.
//!
//! Provides:
//! - Wire protocol (tagged JSON)
//! - Message dispatch onto the conversation engine
//! - WebSocket transport (feature: websocket)

pub mod dispatch;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use dispatch::{dispatch, project_event};
pub use protocol::{
    ClientMessage, CommandHint, ConfigSummary, DisplayMessage, ProtocolError, ServerMessage,
    ViewPayload,
};
#[cfg(feature = "websocket")]
pub use websocket::create_ws_router;
