//! Command dispatch table.

use std::sync::Arc;

use async_trait::async_trait;
use logspy_core::{Debuggee, EventBridge, LogpointHit};
use logspy_session::{DebugSession, SessionError};

use crate::protocol::{Command, CommandResponse, ErrorCode};

/// Failure of one command, reported on its own response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<SessionError> for HandlerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::ScriptNotFound(_) | SessionError::LogpointNotFound(_) => {
                Self::NotFound(e.to_string())
            }
            SessionError::InvalidLocation { .. } => Self::InvalidArgument(e.to_string()),
            _ => Self::Internal(e.to_string()),
        }
    }
}

impl From<HandlerError> for CommandResponse {
    fn from(e: HandlerError) -> Self {
        Self::error(e.code(), e.to_string())
    }
}

/// Serves decoded commands and feeds logpoint hits to the stream.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute one command.
    async fn handle(&self, command: Command) -> Result<CommandResponse, HandlerError>;

    /// Attach a consumer of logpoint hits for one connection.
    fn subscribe_hits(&self) -> EventBridge<LogpointHit>;
}

/// Dispatch table over a [`DebugSession`].
pub struct SessionHandler<D: ?Sized> {
    session: Arc<DebugSession<D>>,
}

impl<D: ?Sized> SessionHandler<D> {
    #[must_use]
    pub const fn new(session: Arc<DebugSession<D>>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl<D> CommandHandler for SessionHandler<D>
where
    D: Debuggee + ?Sized + 'static,
{
    async fn handle(&self, command: Command) -> Result<CommandResponse, HandlerError> {
        let response = match command {
            Command::GetSources => CommandResponse::GetSources {
                scripts: self.session.get_scripts()?,
            },
            Command::GetScriptSource { script_id } => {
                let source = self.session.get_script_source(&script_id).await?;
                CommandResponse::GetScriptSource { script_id, source }
            }
            Command::AddLogpoint { script_id, line } => {
                let logpoint = self.session.add_logpoint(&script_id, line).await?;
                CommandResponse::AddLogpoint {
                    breakpoint_id: logpoint.breakpoint_id,
                    actual_location: logpoint.actual_location,
                }
            }
            Command::RemoveLogpoint { breakpoint_id } => {
                self.session.remove_logpoint(&breakpoint_id).await?;
                CommandResponse::RemoveLogpoint { breakpoint_id }
            }
            Command::RemoveLogpointAt { script_id, line } => {
                let removed = self.session.remove_logpoints_at(&script_id, line).await?;
                CommandResponse::RemoveLogpointAt {
                    breakpoint_ids: removed.into_iter().map(|lp| lp.breakpoint_id).collect(),
                }
            }
        };
        Ok(response)
    }

    fn subscribe_hits(&self) -> EventBridge<LogpointHit> {
        self.session.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logspy_core::{DebuggeeEvent, Location, Script, testing::FakeDebuggee};
    use logspy_session::SessionConfig;

    async fn handler() -> (SessionHandler<FakeDebuggee>, Arc<FakeDebuggee>) {
        let (debuggee, events) = FakeDebuggee::new();
        let session = DebugSession::new(Arc::clone(&debuggee), events, SessionConfig::default());
        session.initialize().await.unwrap();
        session
            .handle_event(DebuggeeEvent::ScriptParsed(
                Script::new("42", "file:///srv/app.js").with_extents((0, 0), (10, 0)),
            ))
            .await;
        (SessionHandler::new(session), debuggee)
    }

    #[tokio::test]
    async fn test_get_sources() {
        let (handler, _debuggee) = handler().await;
        let CommandResponse::GetSources { scripts } =
            handler.handle(Command::GetSources).await.unwrap()
        else {
            panic!("expected sources");
        };
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].url, "file:///srv/app.js");
    }

    #[tokio::test]
    async fn test_add_and_remove_logpoint() {
        let (handler, debuggee) = handler().await;

        let added = handler
            .handle(Command::AddLogpoint {
                script_id: "42".to_string(),
                line: 7,
            })
            .await
            .unwrap();
        assert_eq!(
            added,
            CommandResponse::AddLogpoint {
                breakpoint_id: "b1".to_string(),
                actual_location: Location::line("42", 7).with_column(0),
            }
        );

        let removed = handler
            .handle(Command::RemoveLogpoint {
                breakpoint_id: "b1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            removed,
            CommandResponse::RemoveLogpoint {
                breakpoint_id: "b1".to_string(),
            }
        );
        assert!(debuggee.installed_breakpoints().is_empty());
    }

    #[tokio::test]
    async fn test_remove_logpoint_by_location() {
        let (handler, debuggee) = handler().await;
        for line in [7, 7, 8] {
            handler
                .handle(Command::AddLogpoint {
                    script_id: "42".to_string(),
                    line,
                })
                .await
                .unwrap();
        }

        let removed = handler
            .handle(Command::RemoveLogpointAt {
                script_id: "42".to_string(),
                line: 7,
            })
            .await
            .unwrap();
        assert_eq!(
            removed,
            CommandResponse::RemoveLogpointAt {
                breakpoint_ids: vec!["b1".to_string(), "b2".to_string()],
            }
        );
        assert_eq!(debuggee.installed_breakpoints().len(), 1);
        assert!(debuggee.installed_breakpoints().contains("b3"));
    }

    #[tokio::test]
    async fn test_errors_map_to_codes() {
        let (handler, _debuggee) = handler().await;

        let missing = handler
            .handle(Command::GetScriptSource {
                script_id: "7".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(missing.code(), ErrorCode::NotFound);

        let outside = handler
            .handle(Command::AddLogpoint {
                script_id: "42".to_string(),
                line: 99,
            })
            .await
            .unwrap_err();
        assert_eq!(outside.code(), ErrorCode::InvalidArgument);

        let response = CommandResponse::from(missing);
        assert!(response.is_error());
    }
}
