//! Shared backend state: the connected agent and its outstanding commands.

use std::{collections::HashMap, sync::Arc, time::Duration};

use logspy_core::LogpointHit;
use logspy_transport::{Command, CommandResponse, RawCommand};
use tokio::sync::{RwLock, mpsc, oneshot};
use uuid::Uuid;

/// How long a control request waits for the agent's answer.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a command could not be answered.
#[derive(Debug, PartialEq, Eq)]
pub enum RequestError {
    NoAgent,
    Disconnected,
    Timeout,
}

/// Command stream of the connected agent.
struct AgentLink {
    session_id: String,
    frames: mpsc::UnboundedSender<String>,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub token: Arc<str>,
    sessions: Arc<RwLock<HashMap<String, String>>>, // session_id -> app_name
    agent: Arc<RwLock<Option<AgentLink>>>,
    pending: Arc<RwLock<HashMap<String, oneshot::Sender<CommandResponse>>>>,
    hits: Arc<RwLock<Vec<LogpointHit>>>,
}

impl AppState {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
            sessions: Arc::default(),
            agent: Arc::default(),
            pending: Arc::default(),
            hits: Arc::default(),
        }
    }

    pub fn is_authorized(&self, authorization: Option<&str>) -> bool {
        authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| token == &*self.token)
    }

    /// Grant a session to an agent.
    pub async fn open_session(&self, app_name: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), app_name.to_string());
        tracing::info!(%session_id, %app_name, "session granted");
        session_id
    }

    pub async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Make `session_id` the connected agent; frames for it go to `frames`.
    pub async fn attach_agent(&self, session_id: &str, frames: mpsc::UnboundedSender<String>) {
        *self.agent.write().await = Some(AgentLink {
            session_id: session_id.to_string(),
            frames,
        });
    }

    /// Forget the agent if `session_id` is still the connected one.
    pub async fn detach_agent(&self, session_id: &str) {
        let mut agent = self.agent.write().await;
        if agent.as_ref().is_some_and(|link| link.session_id == session_id) {
            *agent = None;
        }
    }

    /// Send `command` to the agent and wait for its correlated response.
    pub async fn request(&self, command: Command) -> Result<CommandResponse, RequestError> {
        let request_id = Uuid::new_v4().to_string();
        let request = serde_json::to_value(&command).map_err(|_| RequestError::Disconnected)?;
        let frame = serde_json::to_string(&RawCommand::new(request_id.clone(), request))
            .map_err(|_| RequestError::Disconnected)?;

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(request_id.clone(), tx);

        let sent = match self.agent.read().await.as_ref() {
            Some(link) => link.frames.send(frame).is_ok(),
            None => {
                self.pending.write().await.remove(&request_id);
                return Err(RequestError::NoAgent);
            }
        };
        if !sent {
            self.pending.write().await.remove(&request_id);
            return Err(RequestError::Disconnected);
        }
        tracing::debug!(%request_id, command = command.name(), "command sent");

        let result = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RequestError::Disconnected),
            Err(_) => Err(RequestError::Timeout),
        };
        self.pending.write().await.remove(&request_id);
        result
    }

    /// Deliver a response from the agent.
    pub async fn complete(&self, request_id: &str, response: CommandResponse) {
        match self.pending.write().await.remove(request_id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::debug!(%request_id, "response for unknown or expired request"),
        }
    }

    pub async fn record_hit(&self, hit: LogpointHit) {
        tracing::info!(breakpoint_ids = ?hit.breakpoint_ids, vars = %hit.vars, "logpoint hit");
        self.hits.write().await.push(hit);
    }

    pub async fn hits(&self) -> Vec<LogpointHit> {
        self.hits.read().await.clone()
    }
}
