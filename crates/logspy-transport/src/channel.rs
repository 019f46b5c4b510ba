//! Backend channel abstraction.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::protocol::{AgentMessage, InitSession, RawCommand, SessionInfo};

/// Messages the agent sends for the lifetime of one stream.
pub type OutboundStream = BoxStream<'static, AgentMessage>;

/// Commands the backend sends; an `Err` item ends the stream.
pub type InboundStream = BoxStream<'static, Result<RawCommand, BackendError>>;

/// Backend channel error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Command stream closed")]
    Closed,
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Whether reconnecting can help. Bad credentials and rejected requests
    /// fail the same way on every attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unauthenticated(_) | Self::InvalidArgument(_))
    }

    /// Map a backend error code from a bootstrap reply.
    #[must_use]
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "unauthenticated" | "permission_denied" => Self::Unauthenticated(message),
            "invalid_argument" => Self::InvalidArgument(message),
            _ => Self::Protocol(format!("{code}: {message}")),
        }
    }
}

/// Backend side of the command stream.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Register this process with the backend.
    async fn init_session(&self, request: &InitSession) -> Result<SessionInfo, BackendError>;

    /// Open the bidirectional command stream for `session`.
    ///
    /// The backend consumes `outbound` until it ends or the stream fails.
    async fn open_stream(
        &self,
        session: &SessionInfo,
        outbound: OutboundStream,
    ) -> Result<InboundStream, BackendError>;
}
