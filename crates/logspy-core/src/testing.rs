//! Scripted in-memory debuggee for tests (feature: testing).

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    traits::{Debuggee, DebuggeeError, DebuggeeEventSender, DebuggeeEvents, event_channel},
    types::{
        BreakpointPlacement, DebuggeeEvent, Location, ObjectId, PausedEvent, PropertyDescriptor,
        Script, ScriptId,
    },
};

/// A protocol call observed by [`FakeDebuggee`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Attach,
    Enable,
    SetBlackboxPatterns(Vec<String>),
    SetBreakpointsActive(bool),
    SetBreakpoint(Location),
    RemoveBreakpoint(String),
    GetScriptSource(String),
    GetProperties(String),
    Resume,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Debuggee double that records every call and serves scripted data.
pub struct FakeDebuggee {
    calls: Mutex<Vec<Call>>,
    sources: Mutex<HashMap<ScriptId, String>>,
    objects: Mutex<HashMap<ObjectId, Vec<PropertyDescriptor>>>,
    failing_objects: Mutex<HashSet<ObjectId>>,
    panicking_objects: Mutex<HashSet<ObjectId>>,
    breakpoints: Mutex<HashSet<String>>,
    next_breakpoint: AtomicU64,
    fail_attach: AtomicBool,
    events: Mutex<Option<DebuggeeEventSender>>,
    resumed: Notify,
}

impl FakeDebuggee {
    /// Create the double and the notification channel the session consumes.
    #[must_use]
    pub fn new() -> (Arc<Self>, DebuggeeEvents) {
        let (events, rx) = event_channel();
        let debuggee = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            sources: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            failing_objects: Mutex::new(HashSet::new()),
            panicking_objects: Mutex::new(HashSet::new()),
            breakpoints: Mutex::new(HashSet::new()),
            next_breakpoint: AtomicU64::new(1),
            fail_attach: AtomicBool::new(false),
            events: Mutex::new(Some(events)),
            resumed: Notify::new(),
        });
        (debuggee, rx)
    }

    /// Serve `source` for `script_id`.
    pub fn set_source(&self, script_id: impl Into<ScriptId>, source: impl Into<String>) {
        guard(&self.sources).insert(script_id.into(), source.into());
    }

    /// Serve `properties` for `object_id`.
    pub fn set_object(&self, object_id: impl Into<ObjectId>, properties: Vec<PropertyDescriptor>) {
        guard(&self.objects).insert(object_id.into(), properties);
    }

    /// Make property fetches of `object_id` fail.
    pub fn fail_properties(&self, object_id: impl Into<ObjectId>) {
        guard(&self.failing_objects).insert(object_id.into());
    }

    /// Make property fetches of `object_id` panic.
    pub fn panic_on_properties(&self, object_id: impl Into<ObjectId>) {
        guard(&self.panicking_objects).insert(object_id.into());
    }

    /// Make the next `attach` fail.
    pub fn fail_attach(&self) {
        self.fail_attach.store(true, Ordering::SeqCst);
    }

    /// Announce a parsed script.
    pub fn parse_script(&self, script: Script) {
        self.send(DebuggeeEvent::ScriptParsed(script));
    }

    /// Announce a pause.
    pub fn pause(&self, event: PausedEvent) {
        self.send(DebuggeeEvent::Paused(event));
    }

    /// Drop the link: the notification channel ends and breakpoints are gone.
    pub fn disconnect(&self) {
        guard(&self.events).take();
        guard(&self.breakpoints).clear();
    }

    fn send(&self, event: DebuggeeEvent) {
        if let Some(events) = guard(&self.events).as_ref() {
            let _ = events.send(event);
        }
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        guard(&self.calls).clone()
    }

    /// Number of `resume` calls observed.
    #[must_use]
    pub fn resume_count(&self) -> usize {
        guard(&self.calls)
            .iter()
            .filter(|c| **c == Call::Resume)
            .count()
    }

    /// Wait until the next `resume` call (or return at once if one is unclaimed).
    pub async fn wait_resumed(&self) {
        self.resumed.notified().await;
    }

    /// Breakpoints currently installed.
    #[must_use]
    pub fn installed_breakpoints(&self) -> HashSet<String> {
        guard(&self.breakpoints).clone()
    }

    fn record(&self, call: Call) {
        guard(&self.calls).push(call);
    }
}

fn not_found(what: &str) -> DebuggeeError {
    DebuggeeError::Protocol {
        code: -32000,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl Debuggee for FakeDebuggee {
    async fn attach(&self) -> Result<(), DebuggeeError> {
        self.record(Call::Attach);
        if self.fail_attach.swap(false, Ordering::SeqCst) {
            return Err(DebuggeeError::Attach("connection refused".to_string()));
        }
        Ok(())
    }

    async fn enable(&self) -> Result<(), DebuggeeError> {
        self.record(Call::Enable);
        Ok(())
    }

    async fn set_blackbox_patterns(&self, patterns: &[String]) -> Result<(), DebuggeeError> {
        self.record(Call::SetBlackboxPatterns(patterns.to_vec()));
        Ok(())
    }

    async fn set_breakpoints_active(&self, active: bool) -> Result<(), DebuggeeError> {
        self.record(Call::SetBreakpointsActive(active));
        Ok(())
    }

    async fn set_breakpoint(&self, location: &Location) -> Result<BreakpointPlacement, DebuggeeError> {
        self.record(Call::SetBreakpoint(location.clone()));
        let id = format!("b{}", self.next_breakpoint.fetch_add(1, Ordering::SeqCst));
        guard(&self.breakpoints).insert(id.clone());

        let actual_location = location
            .clone()
            .with_column(location.column_number.unwrap_or(0));
        Ok(BreakpointPlacement {
            breakpoint_id: id,
            actual_location,
        })
    }

    async fn remove_breakpoint(&self, breakpoint_id: &str) -> Result<(), DebuggeeError> {
        self.record(Call::RemoveBreakpoint(breakpoint_id.to_string()));
        if guard(&self.breakpoints).remove(breakpoint_id) {
            Ok(())
        } else {
            Err(not_found("breakpoint"))
        }
    }

    async fn get_script_source(&self, script_id: &str) -> Result<String, DebuggeeError> {
        self.record(Call::GetScriptSource(script_id.to_string()));
        guard(&self.sources)
            .get(script_id)
            .cloned()
            .ok_or_else(|| not_found("script"))
    }

    async fn get_properties(
        &self,
        object_id: &str,
        _own_properties: bool,
    ) -> Result<Vec<PropertyDescriptor>, DebuggeeError> {
        self.record(Call::GetProperties(object_id.to_string()));
        if guard(&self.panicking_objects).contains(object_id) {
            panic!("scripted panic fetching {object_id}");
        }
        if guard(&self.failing_objects).contains(object_id) {
            return Err(DebuggeeError::Protocol {
                code: -32000,
                message: "Could not find object with given id".to_string(),
            });
        }
        guard(&self.objects)
            .get(object_id)
            .cloned()
            .ok_or_else(|| not_found("object"))
    }

    async fn resume(&self) -> Result<(), DebuggeeError> {
        self.record(Call::Resume);
        self.resumed.notify_one();
        Ok(())
    }
}
