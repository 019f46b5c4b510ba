//! Agent lifecycle and supervisor.
//!
//! The agent runs on its own OS thread with its own runtime, so handling a
//! pause never depends on the monitored process's event loop being free.

use std::{sync::Arc, thread, time::Duration};

use logspy_core::Debuggee;
use logspy_inspector::InspectorClient;
use logspy_session::{DebugSession, SessionError};
use logspy_transport::{
    Backend, BackendError, CommandStream, InitSession, SessionHandler, WebSocketBackend,
};
use tokio::sync::oneshot;

use crate::config::{AgentConfig, ConfigError};

/// Agent error.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to start agent thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Debug session error: {0}")]
    Session(#[from] SessionError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Debuggee disconnected")]
    DebuggeeDisconnected,
    #[error("Command stream restarted {0} times, giving up")]
    RestartsExhausted(u32),
    #[error("Agent thread panicked")]
    Panicked,
}

/// Handle to a running agent.
pub struct AgentHandle {
    thread: thread::JoinHandle<Result<(), AgentError>>,
    shutdown: oneshot::Sender<()>,
}

impl AgentHandle {
    /// Wait for the agent to stop.
    ///
    /// # Errors
    /// Returns the error that stopped the agent.
    pub fn join(self) -> Result<(), AgentError> {
        self.thread.join().map_err(|_| AgentError::Panicked)?
    }

    /// Stop the agent and wait for its thread.
    ///
    /// # Errors
    /// Returns the error the agent stopped with, if it had already failed.
    pub fn shutdown(self) -> Result<(), AgentError> {
        let Self { thread, shutdown } = self;
        let _ = shutdown.send(());
        thread.join().map_err(|_| AgentError::Panicked)?
    }
}

/// Validate `config` and launch the agent.
///
/// Returns `None` when the agent is disabled for this environment.
///
/// # Errors
/// Returns `Config` for missing required fields, `Spawn` if the thread or
/// its runtime cannot be created.
pub fn init(config: AgentConfig) -> Result<Option<AgentHandle>, AgentError> {
    config.validate()?;
    if !config.is_enabled() {
        tracing::info!(environment = %config.environment, "logspy agent disabled");
        return Ok(None);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(AgentError::Spawn)?;
    let (shutdown, shutdown_rx) = oneshot::channel();

    let thread = thread::Builder::new()
        .name("logspy-agent".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                tokio::select! {
                    result = run(config) => result,
                    Ok(()) = shutdown_rx => {
                        tracing::info!("logspy agent shutting down");
                        Ok(())
                    }
                }
            })
        })
        .map_err(AgentError::Spawn)?;

    Ok(Some(AgentHandle { thread, shutdown }))
}

/// Run the agent against the configured inspector and backend.
///
/// # Errors
/// See [`supervise`].
pub async fn run(config: AgentConfig) -> Result<(), AgentError> {
    let (debuggee, events) = InspectorClient::new(config.inspector_url.clone());
    tracing::info!(
        inspector = %debuggee.url(),
        backend = %config.backend_url(),
        "starting logspy agent"
    );
    let session = DebugSession::new(debuggee, events, config.session_config());
    let backend = Arc::new(WebSocketBackend::new(
        config.backend_url(),
        config.access_token.clone(),
    ));
    supervise(&config, session, backend).await
}

/// Attach `session`, then keep its command stream alive.
///
/// When the stream gives up after its retries, it is restarted from a fresh
/// `InitSession` after a jittered delay, up to `max_restarts` times.
///
/// # Errors
/// Returns `Session` if attaching fails, `Backend` for a non-retryable
/// backend error, `DebuggeeDisconnected` when the debuggee goes away, or
/// `RestartsExhausted`.
pub async fn supervise<D, B>(
    config: &AgentConfig,
    session: Arc<DebugSession<D>>,
    backend: Arc<B>,
) -> Result<(), AgentError>
where
    D: Debuggee + ?Sized + 'static,
    B: Backend + ?Sized,
{
    let mut notifications = session.initialize().await?;

    let handler = Arc::new(SessionHandler::new(Arc::clone(&session)));
    let stream = CommandStream::new(
        backend,
        handler,
        InitSession::for_process(config.app_name.clone()),
        config.backoff,
    );

    let mut restarts = 0;
    loop {
        let error = tokio::select! {
            error = stream.run() => error,
            _ = &mut notifications => return Err(AgentError::DebuggeeDisconnected),
        };
        if !error.is_retryable() {
            tracing::error!(error = %error, "backend rejected the agent, stopping");
            return Err(error.into());
        }
        if config.max_restarts.is_some_and(|max| restarts >= max) {
            tracing::error!(restarts, "command stream restarts exhausted");
            return Err(AgentError::RestartsExhausted(restarts));
        }

        restarts += 1;
        let delay = restart_delay(config);
        tracing::warn!(
            error = %error,
            restarts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "restarting command stream"
        );
        tokio::time::sleep(delay).await;
    }
}

fn restart_delay(config: &AgentConfig) -> Duration {
    config.backoff.delay(config.backoff.max_retries)
}
