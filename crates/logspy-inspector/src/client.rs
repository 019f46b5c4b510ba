//! Inspector client.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use logspy_core::{
    BreakpointPlacement, Debuggee, DebuggeeError, DebuggeeEvent, DebuggeeEventSender,
    DebuggeeEvents, Location, PausedEvent, PropertyDescriptor, Script, event_channel,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::cdp::{
    GetPropertiesResult, Incoming, PAUSED, Request, SCRIPT_PARSED, ScriptSourceResult,
    SetBreakpointResult,
};

/// Inspector error.
#[derive(Debug, thiserror::Error)]
pub enum InspectorError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Not attached")]
    NotAttached,
    #[error("Inspector connection closed")]
    Closed,
    #[error("Invalid {method} result: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<InspectorError> for DebuggeeError {
    fn from(e: InspectorError) -> Self {
        match e {
            InspectorError::Connect { .. } => Self::Attach(e.to_string()),
            InspectorError::NotAttached | InspectorError::Closed => Self::Disconnected,
            InspectorError::Decode { .. } => Self::UnexpectedResponse(e.to_string()),
        }
    }
}

type Reply = Result<Value, DebuggeeError>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Calls awaiting their response, by request id.
#[derive(Default)]
struct Pending {
    calls: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
}

impl Pending {
    fn insert(&self, id: u64, tx: oneshot::Sender<Reply>) {
        lock(&self.calls).insert(id, tx);
    }

    fn complete(&self, id: u64, reply: Reply) {
        match lock(&self.calls).remove(&id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::debug!(id, "response for unknown request"),
        }
    }

    fn forget(&self, id: u64) {
        lock(&self.calls).remove(&id);
    }

    /// Fail every outstanding call.
    fn disconnect(&self) {
        for (_, tx) in lock(&self.calls).drain() {
            let _ = tx.send(Err(DebuggeeError::Disconnected));
        }
    }
}

type Link = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// Routes incoming frames to pending calls and to the session's event channel.
struct Router {
    link: Link,
    pending: Arc<Pending>,
    events: DebuggeeEventSender,
}

impl Router {
    /// Tear down after the socket ended: later calls fail with `NotAttached`,
    /// outstanding ones with `Disconnected`, and the notification channel ends.
    fn close(self) {
        lock(&self.link).take();
        self.pending.disconnect();
    }

    fn route(&self, text: &str) {
        let incoming = match serde_json::from_str::<Incoming>(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable inspector frame");
                return;
            }
        };

        match incoming {
            Incoming::Response {
                id,
                error: Some(error),
                ..
            } => self.pending.complete(
                id,
                Err(DebuggeeError::Protocol {
                    code: error.code,
                    message: error.message,
                }),
            ),
            Incoming::Response { id, result, .. } => {
                self.pending.complete(id, Ok(result.unwrap_or(Value::Null)));
            }
            Incoming::Notification { method, params } => self.notify(&method, params),
        }
    }

    fn notify(&self, method: &str, params: Value) {
        let event = match method {
            SCRIPT_PARSED => serde_json::from_value::<Script>(params).map(DebuggeeEvent::ScriptParsed),
            PAUSED => serde_json::from_value::<PausedEvent>(params).map(DebuggeeEvent::Paused),
            _ => {
                tracing::debug!(%method, "inspector notification");
                return;
            }
        };
        match event {
            Ok(event) => {
                let _ = self.events.send(event);
            }
            Err(e) => tracing::warn!(%method, error = %e, "invalid inspector notification"),
        }
    }
}

/// [`Debuggee`] speaking CDP to a V8 inspector WebSocket.
pub struct InspectorClient {
    url: String,
    next_id: AtomicU64,
    pending: Arc<Pending>,
    link: Link,
    /// Handed to the reader task on attach.
    events: Mutex<Option<DebuggeeEventSender>>,
}

impl InspectorClient {
    /// Create a client for the inspector at `url` and its notification channel.
    #[must_use]
    pub fn new(url: impl Into<String>) -> (Arc<Self>, DebuggeeEvents) {
        let (events, rx) = event_channel();
        let client = Arc::new(Self {
            url: url.into(),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Pending::default()),
            link: Arc::default(),
            events: Mutex::new(Some(events)),
        });
        (client, rx)
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wire up an established link: frames sent go to `outgoing`, frames
    /// received are fed to the returned router.
    fn link(&self, outgoing: mpsc::UnboundedSender<String>) -> Result<Router, InspectorError> {
        let events = lock(&self.events).take().ok_or(InspectorError::Closed)?;
        *lock(&self.link) = Some(outgoing);
        Ok(Router {
            link: Arc::clone(&self.link),
            pending: Arc::clone(&self.pending),
            events,
        })
    }

    async fn connect(&self) -> Result<(), InspectorError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| InspectorError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        let (mut sink, mut source) = socket.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let router = self.link(outgoing)?;

        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                if sink.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => router.route(text.as_str()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Inspector socket error: {e}");
                        break;
                    }
                }
            }
            tracing::info!("inspector connection closed");
            router.close();
        });

        tracing::info!(url = %self.url, "attached to inspector");
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&Request { id, method, params })
            .map_err(|e| DebuggeeError::UnexpectedResponse(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let sent = lock(&self.link)
            .as_ref()
            .is_some_and(|link| link.send(frame).is_ok());
        if !sent {
            self.pending.forget(id);
            return Err(InspectorError::NotAttached.into());
        }

        tracing::trace!(id, %method, "inspector call");
        rx.await.map_err(|_| DebuggeeError::Disconnected)?
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, DebuggeeError> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).map_err(|source| {
            InspectorError::Decode {
                method: method.to_string(),
                source,
            }
            .into()
        })
    }
}

#[async_trait]
impl Debuggee for InspectorClient {
    async fn attach(&self) -> Result<(), DebuggeeError> {
        if lock(&self.link).is_some() {
            return Ok(());
        }
        self.connect().await.map_err(Into::into)
    }

    async fn enable(&self) -> Result<(), DebuggeeError> {
        self.call("Runtime.enable", json!({})).await?;
        self.call("Debugger.enable", json!({})).await?;
        Ok(())
    }

    async fn set_blackbox_patterns(&self, patterns: &[String]) -> Result<(), DebuggeeError> {
        self.call("Debugger.setBlackboxPatterns", json!({ "patterns": patterns }))
            .await?;
        Ok(())
    }

    async fn set_breakpoints_active(&self, active: bool) -> Result<(), DebuggeeError> {
        self.call("Debugger.setBreakpointsActive", json!({ "active": active }))
            .await?;
        Ok(())
    }

    async fn set_breakpoint(&self, location: &Location) -> Result<BreakpointPlacement, DebuggeeError> {
        let result: SetBreakpointResult = self
            .call_as("Debugger.setBreakpoint", json!({ "location": location }))
            .await?;
        Ok(BreakpointPlacement {
            breakpoint_id: result.breakpoint_id,
            actual_location: result.actual_location,
        })
    }

    async fn remove_breakpoint(&self, breakpoint_id: &str) -> Result<(), DebuggeeError> {
        self.call(
            "Debugger.removeBreakpoint",
            json!({ "breakpointId": breakpoint_id }),
        )
        .await?;
        Ok(())
    }

    async fn get_script_source(&self, script_id: &str) -> Result<String, DebuggeeError> {
        let result: ScriptSourceResult = self
            .call_as("Debugger.getScriptSource", json!({ "scriptId": script_id }))
            .await?;
        Ok(result.script_source)
    }

    async fn get_properties(
        &self,
        object_id: &str,
        own_properties: bool,
    ) -> Result<Vec<PropertyDescriptor>, DebuggeeError> {
        let result: GetPropertiesResult = self
            .call_as(
                "Runtime.getProperties",
                json!({ "objectId": object_id, "ownProperties": own_properties }),
            )
            .await?;
        Ok(result.result)
    }

    async fn resume(&self) -> Result<(), DebuggeeError> {
        self.call("Debugger.resume", json!({})).await?;
        Ok(())
    }
}
