//! In-memory backend for tests (feature: testing).

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    channel::{Backend, BackendError, InboundStream, OutboundStream},
    protocol::{AgentMessage, InitSession, RawCommand, SessionInfo},
};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backend end of one opened stream.
pub struct Connection {
    pub session: SessionInfo,
    outbound: OutboundStream,
    commands: mpsc::UnboundedSender<Result<RawCommand, BackendError>>,
}

impl Connection {
    /// Send a command to the agent.
    pub fn send(&self, request_id: &str, request: Value) {
        let _ = self.commands.send(Ok(RawCommand::new(request_id, request)));
    }

    /// Fail the stream from the backend side.
    pub fn fail(&self, error: BackendError) {
        let _ = self.commands.send(Err(error));
    }

    /// End the inbound stream.
    pub fn close(self) {
        drop(self.commands);
    }

    /// Next message the agent sent.
    pub async fn next_message(&mut self) -> Option<AgentMessage> {
        self.outbound.next().await
    }
}

/// Backend that hands every opened stream to the test.
pub struct MemoryBackend {
    connections: mpsc::UnboundedSender<Connection>,
    init_failures: Mutex<VecDeque<BackendError>>,
    open_failures: Mutex<VecDeque<BackendError>>,
    inits: AtomicUsize,
    requests: Mutex<Vec<InitSession>>,
}

impl MemoryBackend {
    /// Create the backend and the receiver of its connections.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Connection>) {
        let (connections, rx) = mpsc::unbounded_channel();
        let backend = Arc::new(Self {
            connections,
            init_failures: Mutex::new(VecDeque::new()),
            open_failures: Mutex::new(VecDeque::new()),
            inits: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        });
        (backend, rx)
    }

    /// Queue a failure for a future `init_session` call.
    pub fn fail_next_init(&self, error: BackendError) {
        guard(&self.init_failures).push_back(error);
    }

    /// Queue a failure for a future `open_stream` call.
    pub fn fail_next_open(&self, error: BackendError) {
        guard(&self.open_failures).push_back(error);
    }

    /// Number of `init_session` calls so far.
    #[must_use]
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// Bootstrap requests received, in order.
    #[must_use]
    pub fn init_requests(&self) -> Vec<InitSession> {
        guard(&self.requests).clone()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn init_session(&self, request: &InitSession) -> Result<SessionInfo, BackendError> {
        let n = self.inits.fetch_add(1, Ordering::SeqCst) + 1;
        guard(&self.requests).push(request.clone());
        if let Some(error) = guard(&self.init_failures).pop_front() {
            return Err(error);
        }
        Ok(SessionInfo {
            session_id: format!("s{n}"),
        })
    }

    async fn open_stream(
        &self,
        session: &SessionInfo,
        outbound: OutboundStream,
    ) -> Result<InboundStream, BackendError> {
        if let Some(error) = guard(&self.open_failures).pop_front() {
            return Err(error);
        }
        let (commands, rx) = mpsc::unbounded_channel();
        self.connections
            .send(Connection {
                session: session.clone(),
                outbound,
                commands,
            })
            .map_err(|_| BackendError::Transport("backend gone".to_string()))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
