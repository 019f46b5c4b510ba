//! Multiplexed command stream.
//!
//! One connection carries two independent flows: commands from the backend,
//! and responses plus logpoint hits from the agent. Commands are dispatched
//! concurrently, so responses may leave in a different order than their
//! commands arrived; the backend correlates them by `requestId` alone.
//!
//! A connection is discarded on any transport failure. Commands still in
//! flight at that point are abandoned: their completion goes to the dead
//! connection's emitter, which no longer has a listener.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt, StreamExt};
use logspy_core::{Emitter, merge};
use tokio::sync::watch;

use crate::{
    backoff::BackoffPolicy,
    channel::{Backend, BackendError},
    handlers::CommandHandler,
    protocol::{AgentMessage, Command, CommandResponse, ErrorCode, InitSession, RawCommand},
};

/// Connection state of the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
}

/// Reconnecting command stream.
pub struct CommandStream<B: ?Sized, H: ?Sized> {
    backend: Arc<B>,
    handler: Arc<H>,
    init: InitSession,
    policy: BackoffPolicy,
    state: watch::Sender<ConnectionState>,
}

impl<B, H> CommandStream<B, H>
where
    B: Backend + ?Sized,
    H: CommandHandler + ?Sized + 'static,
{
    #[must_use]
    pub fn new(backend: Arc<B>, handler: Arc<H>, init: InitSession, policy: BackoffPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            backend,
            handler,
            init,
            policy,
            state,
        }
    }

    /// Watch the connection state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Keep the stream connected, backing off between failed attempts.
    ///
    /// Returns the error that ended it: a non-retryable one at once, or the
    /// last retryable one after `max_retries` consecutive failures. A
    /// connection that reached streaming resets the failure count.
    pub async fn run(&self) -> BackendError {
        let mut attempt = 0;
        loop {
            let mut streamed = false;
            let error = self.connect(&mut streamed).await;

            if !error.is_retryable() {
                tracing::error!(error = %error, "command stream rejected by backend");
                return error;
            }
            if streamed {
                attempt = 0;
            }
            if attempt >= self.policy.max_retries {
                tracing::error!(error = %error, attempt, "command stream retries exhausted");
                return error;
            }

            let delay = self.policy.delay(attempt);
            tracing::warn!(
                error = %error,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "command stream failed, reconnecting"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Run a single connection attempt until it fails.
    pub async fn connect_once(&self) -> BackendError {
        let mut streamed = false;
        self.connect(&mut streamed).await
    }

    async fn connect(&self, streamed: &mut bool) -> BackendError {
        self.state.send_replace(ConnectionState::Connecting);
        let error = self.stream(streamed).await;
        self.state.send_replace(ConnectionState::Disconnected);
        error
    }

    async fn stream(&self, streamed: &mut bool) -> BackendError {
        let session = match self.backend.init_session(&self.init).await {
            Ok(session) => session,
            Err(e) => return e,
        };
        tracing::info!(session_id = %session.session_id, "backend session granted");

        // fresh per connection so late completions never reach a new one
        let responses = Arc::new(Emitter::new());
        let hits = self.handler.subscribe_hits();
        let hits_closer = hits.closer();
        let outbound = merge(vec![
            responses.bridge().boxed(),
            hits.map(AgentMessage::LogpointHit).boxed(),
        ]);

        let mut inbound = match self.backend.open_stream(&session, outbound).await {
            Ok(inbound) => inbound,
            Err(e) => return e,
        };
        *streamed = true;
        self.state.send_replace(ConnectionState::Streaming);
        tracing::info!("command stream connected");

        let error = loop {
            match inbound.next().await {
                Some(Ok(command)) => self.dispatch(command, &responses),
                Some(Err(e)) => break e,
                None => break BackendError::Closed,
            }
        };

        responses.close_all();
        hits_closer.close();
        error
    }

    fn dispatch(&self, raw: RawCommand, responses: &Arc<Emitter<AgentMessage>>) {
        let RawCommand {
            request_id,
            request,
        } = raw;

        let command = match Command::decode(request) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(%request_id, error = %e, "rejecting command");
                responses.emit(AgentMessage::response(
                    request_id,
                    CommandResponse::error(e.code(), e.to_string()),
                ));
                return;
            }
        };
        tracing::debug!(%request_id, command = command.name(), "dispatching command");

        let handler = Arc::clone(&self.handler);
        let responses = Arc::clone(responses);
        tokio::spawn(async move {
            let response = match AssertUnwindSafe(handler.handle(command)).catch_unwind().await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::debug!(%request_id, error = %e, "command failed");
                    e.into()
                }
                Err(_) => {
                    tracing::error!(%request_id, "command handler panicked");
                    CommandResponse::error(ErrorCode::Internal, "command handler panicked")
                }
            };
            if responses.emit(AgentMessage::response(request_id.clone(), response)) == 0 {
                tracing::debug!(%request_id, "connection gone, response discarded");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        handlers::HandlerError,
        testing::{Connection, MemoryBackend},
    };
    use async_trait::async_trait;
    use logspy_core::{EventBridge, LogpointHit};
    use serde_json::json;
    use tokio::sync::{Notify, mpsc};

    /// Answers `getScriptSource` for "slow" only once the gate opens.
    struct GatedHandler {
        gate: Notify,
        hits: Emitter<LogpointHit>,
    }

    impl GatedHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Notify::new(),
                hits: Emitter::new(),
            })
        }
    }

    #[async_trait]
    impl CommandHandler for GatedHandler {
        async fn handle(&self, command: Command) -> Result<CommandResponse, HandlerError> {
            match command {
                Command::GetScriptSource { script_id } if script_id == "slow" => {
                    self.gate.notified().await;
                    Ok(CommandResponse::GetScriptSource {
                        script_id,
                        source: String::new(),
                    })
                }
                Command::GetScriptSource { script_id } => Ok(CommandResponse::GetScriptSource {
                    source: format!("// {script_id}"),
                    script_id,
                }),
                Command::RemoveLogpoint { breakpoint_id } => {
                    Err(HandlerError::NotFound(format!("Logpoint not found: {breakpoint_id}")))
                }
                _ => Ok(CommandResponse::GetSources { scripts: vec![] }),
            }
        }

        fn subscribe_hits(&self) -> EventBridge<LogpointHit> {
            self.hits.bridge()
        }
    }

    fn source(script_id: &str) -> serde_json::Value {
        json!({"case": "getScriptSource", "scriptId": script_id})
    }

    fn stream_over(
        backend: &Arc<MemoryBackend>,
        handler: &Arc<GatedHandler>,
    ) -> Arc<CommandStream<MemoryBackend, GatedHandler>> {
        Arc::new(CommandStream::new(
            Arc::clone(backend),
            Arc::clone(handler),
            InitSession::for_process("test-app"),
            BackoffPolicy::default(),
        ))
    }

    async fn connected() -> (
        Arc<CommandStream<MemoryBackend, GatedHandler>>,
        Arc<GatedHandler>,
        Connection,
        mpsc::UnboundedReceiver<Connection>,
        tokio::task::JoinHandle<BackendError>,
    ) {
        let (backend, mut connections) = MemoryBackend::new();
        let handler = GatedHandler::new();
        let stream = stream_over(&backend, &handler);
        let task = tokio::spawn({
            let stream = Arc::clone(&stream);
            async move { stream.connect_once().await }
        });
        let connection = connections.recv().await.unwrap();
        (stream, handler, connection, connections, task)
    }

    #[tokio::test]
    async fn test_unknown_command_answered_with_error() {
        let (_stream, _handler, mut conn, _rx, _task) = connected().await;

        conn.send("r1", json!({"case": "evaluate"}));
        let reply = conn.next_message().await.unwrap();
        assert_eq!(
            reply,
            AgentMessage::response(
                "r1",
                CommandResponse::error(ErrorCode::UnknownCommand, "Unknown command: evaluate")
            )
        );

        // the channel stays open
        conn.send("r2", source("a"));
        let reply = conn.next_message().await.unwrap();
        assert_eq!(reply.request_id(), Some("r2"));
    }

    #[tokio::test]
    async fn test_handler_error_is_correlated() {
        let (_stream, _handler, mut conn, _rx, _task) = connected().await;

        conn.send("r7", json!({"case": "removeLogpoint", "breakpointId": "b9"}));
        let AgentMessage::Response {
            request_id,
            response,
        } = conn.next_message().await.unwrap()
        else {
            panic!("expected a response");
        };
        assert_eq!(request_id, "r7");
        assert!(matches!(
            response,
            CommandResponse::Error {
                code: ErrorCode::NotFound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_responses_may_overtake_slow_commands() {
        let (_stream, handler, mut conn, _rx, _task) = connected().await;

        conn.send("r1", source("slow"));
        conn.send("r2", source("fast"));

        let first = conn.next_message().await.unwrap();
        assert_eq!(first.request_id(), Some("r2"));

        handler.gate.notify_one();
        let second = conn.next_message().await.unwrap();
        assert_eq!(second.request_id(), Some("r1"));
    }

    #[tokio::test]
    async fn test_hits_share_the_outbound_stream() {
        let (stream, handler, mut conn, _rx, _task) = connected().await;
        assert_eq!(*stream.state().borrow(), ConnectionState::Streaming);

        conn.send("r1", source("a"));
        let hit = LogpointHit::now(vec!["b1".to_string()], json!({"x": 1}));
        handler.hits.emit(hit.clone());

        let mut received = vec![conn.next_message().await.unwrap(), conn.next_message().await.unwrap()];
        received.sort_by_key(|m| m.request_id().is_some());
        assert_eq!(received[0], AgentMessage::LogpointHit(hit));
        assert_eq!(received[1].request_id(), Some("r1"));
    }

    #[tokio::test]
    async fn test_transport_failure_ends_connection() {
        let (stream, handler, conn, _rx, task) = connected().await;

        conn.fail(BackendError::Transport("connection reset".to_string()));

        assert_eq!(
            task.await.unwrap(),
            BackendError::Transport("connection reset".to_string())
        );
        assert_eq!(*stream.state().borrow(), ConnectionState::Disconnected);
        assert_eq!(handler.hits.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_inbound_end_is_closed() {
        let (_stream, _handler, conn, _rx, task) = connected().await;
        conn.close();
        assert_eq!(task.await.unwrap(), BackendError::Closed);
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let (backend, _connections) = MemoryBackend::new();
        backend.fail_next_open(BackendError::Transport("503".to_string()));
        let handler = GatedHandler::new();
        let stream = stream_over(&backend, &handler);

        assert_eq!(stream.connect_once().await, BackendError::Transport("503".to_string()));
        assert_eq!(*stream.state().borrow(), ConnectionState::Disconnected);
        assert_eq!(handler.hits.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let (backend, _connections) = MemoryBackend::new();
        backend.fail_next_init(BackendError::Unauthenticated("bad token".to_string()));
        let stream = stream_over(&backend, &GatedHandler::new());

        let error = stream.run().await;

        assert_eq!(error, BackendError::Unauthenticated("bad token".to_string()));
        assert_eq!(backend.init_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_then_gives_up() {
        let (backend, _connections) = MemoryBackend::new();
        for _ in 0..11 {
            backend.fail_next_init(BackendError::Transport("refused".to_string()));
        }
        let stream = stream_over(&backend, &GatedHandler::new());
        let started = tokio::time::Instant::now();

        let error = stream.run().await;

        assert_eq!(error, BackendError::Transport("refused".to_string()));
        assert_eq!(backend.init_count(), 11);
        // ten sleeps, each at least three quarters of its nominal delay
        assert!(started.elapsed() >= Duration::from_millis(750 * (1 + 2 + 4 + 8 + 16) + 24_000 * 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_abandons_in_flight_commands() {
        let (backend, mut connections) = MemoryBackend::new();
        let handler = GatedHandler::new();
        let stream = stream_over(&backend, &handler);
        let task = tokio::spawn({
            let stream = Arc::clone(&stream);
            async move { stream.run().await }
        });

        let first = connections.recv().await.unwrap();
        first.send("r1", source("slow"));
        tokio::task::yield_now().await;
        first.fail(BackendError::Transport("reset".to_string()));

        let mut second = connections.recv().await.unwrap();
        assert_eq!(second.session.session_id, "s2");
        handler.gate.notify_one();
        second.send("r2", source("fast"));

        let reply = second.next_message().await.unwrap();
        assert_eq!(reply.request_id(), Some("r2"));

        second.close();
        drop(connections);
        task.abort();
    }
}
