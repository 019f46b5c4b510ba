//! Command stream between the agent and its backend.
//!
//! Provides:
//! - Wire protocol (JSON text frames)
//! - `Backend` - the backend channel, with retry classification
//! - `CommandStream` - multiplexed command/response/hit stream with reconnect
//! - `SessionHandler` - dispatch table over a `DebugSession`
//! - WebSocket backend client (feature: websocket)

pub mod backoff;
pub mod channel;
pub mod handlers;
pub mod protocol;
pub mod stream;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backoff::{BackoffPolicy, get_backoff_delay};
pub use channel::{Backend, BackendError, InboundStream, OutboundStream};
pub use handlers::{CommandHandler, HandlerError, SessionHandler};
pub use protocol::{
    AgentMessage, Command, CommandResponse, ErrorCode, InitSession, InitSessionReply, RawCommand,
    SessionInfo, WireError,
};
pub use stream::{CommandStream, ConnectionState};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketBackend;
