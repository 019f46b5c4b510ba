//! Debug session: owns the script registry, the logpoint table and the
//! debuggee link, and turns pause notifications into logpoint hits.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use logspy_core::{
    BreakpointId, Debuggee, DebuggeeError, DebuggeeEvent, DebuggeeEvents, Emitter, EventBridge,
    Location, LogpointHit, Script, ScriptId,
};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    logpoints::{Logpoint, LogpointTable},
    pause::PauseState,
    registry::ScriptRegistry,
    snapshot::DEFAULT_MAX_DEPTH,
};

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to attach to debuggee: {0}")]
    Attach(#[source] DebuggeeError),
    #[error("Session already initialized")]
    AlreadyInitialized,
    #[error("Session not initialized")]
    NotInitialized,
    #[error("Script not found: {0}")]
    ScriptNotFound(ScriptId),
    #[error("Logpoint not found: {0}")]
    LogpointNotFound(BreakpointId),
    #[error("Line {line} is outside script {script_id}")]
    InvalidLocation { script_id: ScriptId, line: u32 },
    #[error("Paused with an empty call stack")]
    EmptyCallStack,
    #[error("Top frame has no inspectable scope")]
    MissingScope,
    #[error("Debuggee error: {0}")]
    Debuggee(#[from] DebuggeeError),
}

impl SessionError {
    /// Whether the error refers to an unknown script or logpoint.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ScriptNotFound(_) | Self::LogpointNotFound(_))
    }
}

/// Standing configuration installed on attach.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sources the debuggee should never pause or step in.
    pub blackbox_patterns: Vec<String>,
    /// Nesting levels captured per logpoint hit.
    pub max_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            blackbox_patterns: vec!["/node_modules/".to_string(), "^node:".to_string()],
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Debug session over one debuggee.
pub struct DebugSession<D: ?Sized> {
    config: SessionConfig,
    scripts: ScriptRegistry,
    logpoints: LogpointTable,
    hits: Emitter<LogpointHit>,
    pause_state: watch::Sender<PauseState>,
    events: Mutex<Option<DebuggeeEvents>>,
    initialized: AtomicBool,
    debuggee: Arc<D>,
}

impl<D> DebugSession<D>
where
    D: Debuggee + ?Sized + 'static,
{
    /// Create a session over `debuggee`, consuming its notification channel.
    #[must_use]
    pub fn new(debuggee: Arc<D>, events: DebuggeeEvents, config: SessionConfig) -> Arc<Self> {
        let (pause_state, _) = watch::channel(PauseState::Idle);
        Arc::new(Self {
            config,
            scripts: ScriptRegistry::new(),
            logpoints: LogpointTable::new(),
            hits: Emitter::new(),
            pause_state,
            events: Mutex::new(Some(events)),
            initialized: AtomicBool::new(false),
            debuggee,
        })
    }

    /// Attach to the debuggee, install the standing configuration, enable the
    /// protocol and start consuming notifications.
    ///
    /// Returns the handle of the notification loop, which ends when the
    /// debuggee disconnects.
    ///
    /// # Errors
    /// Returns `Attach` if any setup step fails (the session may be
    /// initialized again), or `AlreadyInitialized`.
    pub async fn initialize(self: &Arc<Self>) -> Result<JoinHandle<()>, SessionError> {
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SessionError::AlreadyInitialized)?;

        if let Err(e) = self.configure().await {
            *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
            return Err(SessionError::Attach(e));
        }

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(
            blackbox_patterns = ?self.config.blackbox_patterns,
            "debug session attached"
        );
        Ok(self.spawn_event_loop(events))
    }

    async fn configure(&self) -> Result<(), DebuggeeError> {
        self.debuggee.attach().await?;
        self.debuggee.set_breakpoints_active(true).await?;
        self.debuggee
            .set_blackbox_patterns(&self.config.blackbox_patterns)
            .await?;
        self.debuggee.enable().await
    }

    fn spawn_event_loop(self: &Arc<Self>, mut events: DebuggeeEvents) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.handle_event(event).await;
            }
            tracing::info!("debuggee notifications ended");
            // the debuggee drops every breakpoint when the link goes away
            session.logpoints.clear();
        })
    }

    /// Apply one notification. Pauses are handled to completion, resume included.
    pub async fn handle_event(&self, event: DebuggeeEvent) {
        match event {
            DebuggeeEvent::ScriptParsed(script) => {
                tracing::trace!(script_id = %script.script_id, url = %script.url, "script parsed");
                self.scripts.record(script);
            }
            DebuggeeEvent::Paused(paused) => {
                self.handle_paused(paused).await;
            }
        }
    }

    /// Every script announced so far, in parse order.
    ///
    /// # Errors
    /// Returns `NotInitialized` before [`Self::initialize`] succeeded.
    pub fn get_scripts(&self) -> Result<Vec<Script>, SessionError> {
        self.ensure_initialized()?;
        Ok(self.scripts.all())
    }

    /// Fetch a script's source.
    ///
    /// # Errors
    /// Returns `ScriptNotFound` for a script the debuggee never announced.
    pub async fn get_script_source(&self, script_id: &str) -> Result<String, SessionError> {
        self.ensure_initialized()?;
        if !self.scripts.contains(script_id) {
            return Err(SessionError::ScriptNotFound(script_id.to_string()));
        }
        Ok(self.debuggee.get_script_source(script_id).await?)
    }

    /// Install a logpoint at `line` of a known script.
    ///
    /// # Errors
    /// Returns `ScriptNotFound`, `InvalidLocation` for a line outside the
    /// script, or the debuggee's error.
    pub async fn add_logpoint(&self, script_id: &str, line: u32) -> Result<Logpoint, SessionError> {
        self.ensure_initialized()?;
        let script = self
            .scripts
            .lookup(script_id)
            .ok_or_else(|| SessionError::ScriptNotFound(script_id.to_string()))?;
        if !script.contains_line(line) {
            return Err(SessionError::InvalidLocation {
                script_id: script_id.to_string(),
                line,
            });
        }

        self.logpoints
            .add(&*self.debuggee, Location::line(script_id, line))
            .await
    }

    /// Remove a logpoint.
    ///
    /// # Errors
    /// Returns `LogpointNotFound` for an unknown id, or the debuggee's error.
    pub async fn remove_logpoint(&self, breakpoint_id: &str) -> Result<Logpoint, SessionError> {
        self.ensure_initialized()?;
        self.logpoints.remove(&*self.debuggee, breakpoint_id).await
    }

    /// Remove every logpoint requested at `line` of `script_id`.
    ///
    /// Removing where nothing is installed is not an error and returns an
    /// empty list.
    ///
    /// # Errors
    /// Returns the debuggee's error; logpoints removed before it stay removed.
    pub async fn remove_logpoints_at(
        &self,
        script_id: &str,
        line: u32,
    ) -> Result<Vec<Logpoint>, SessionError> {
        self.ensure_initialized()?;
        let mut removed = Vec::new();
        for logpoint in self.logpoints.find_at(script_id, line) {
            removed.push(
                self.logpoints
                    .remove(&*self.debuggee, &logpoint.breakpoint_id)
                    .await?,
            );
        }
        Ok(removed)
    }

    /// Attach a new consumer of logpoint hits.
    #[must_use]
    pub fn subscribe(&self) -> EventBridge<LogpointHit> {
        self.hits.bridge()
    }

    /// Watch the pause state.
    #[must_use]
    pub fn pause_state(&self) -> watch::Receiver<PauseState> {
        self.pause_state.subscribe()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> Result<(), SessionError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(SessionError::NotInitialized)
        }
    }
}

impl<D: ?Sized> DebugSession<D> {
    pub(crate) fn debuggee(&self) -> &D {
        &self.debuggee
    }

    pub(crate) const fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub const fn scripts(&self) -> &ScriptRegistry {
        &self.scripts
    }

    pub const fn logpoints(&self) -> &LogpointTable {
        &self.logpoints
    }

    pub const fn hits(&self) -> &Emitter<LogpointHit> {
        &self.hits
    }

    pub(crate) fn set_pause_state(&self, state: PauseState) {
        self.pause_state.send_replace(state);
    }
}
