//! The debuggee protocol consumed by the session.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{
    BreakpointPlacement, DebuggeeEvent, Location, PropertyDescriptor,
};

/// Receiving end of the debuggee's notifications, in emission order.
pub type DebuggeeEvents = mpsc::UnboundedReceiver<DebuggeeEvent>;

/// Sending end of the debuggee's notifications.
pub type DebuggeeEventSender = mpsc::UnboundedSender<DebuggeeEvent>;

/// Create a notification channel for a debuggee implementation.
#[must_use]
pub fn event_channel() -> (DebuggeeEventSender, DebuggeeEvents) {
    mpsc::unbounded_channel()
}

/// Debuggee error.
#[derive(Debug, Error)]
pub enum DebuggeeError {
    #[error("Failed to attach: {0}")]
    Attach(String),
    #[error("Debuggee disconnected")]
    Disconnected,
    #[error("Protocol error {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Operations of an execution engine's debug protocol.
///
/// Implementations deliver `ScriptParsed` and `Paused` notifications through
/// the [`DebuggeeEvents`] channel handed out alongside them. After a pause,
/// the engine stays halted until [`Debuggee::resume`] is called.
#[async_trait]
pub trait Debuggee: Send + Sync {
    /// Connect to the engine. Must succeed before any other call.
    async fn attach(&self) -> Result<(), DebuggeeError>;

    /// Start delivering notifications, replaying already parsed scripts.
    async fn enable(&self) -> Result<(), DebuggeeError>;

    /// Skip pausing and stepping inside sources matching these patterns.
    async fn set_blackbox_patterns(&self, patterns: &[String]) -> Result<(), DebuggeeError>;

    /// Globally activate or deactivate breakpoints.
    async fn set_breakpoints_active(&self, active: bool) -> Result<(), DebuggeeError>;

    /// Place a breakpoint; the engine may move it to the nearest valid location.
    async fn set_breakpoint(&self, location: &Location) -> Result<BreakpointPlacement, DebuggeeError>;

    /// Remove a breakpoint.
    async fn remove_breakpoint(&self, breakpoint_id: &str) -> Result<(), DebuggeeError>;

    /// Fetch the full source text of a script.
    async fn get_script_source(&self, script_id: &str) -> Result<String, DebuggeeError>;

    /// List the properties of a live object.
    async fn get_properties(
        &self,
        object_id: &str,
        own_properties: bool,
    ) -> Result<Vec<PropertyDescriptor>, DebuggeeError>;

    /// Continue execution after a pause.
    async fn resume(&self) -> Result<(), DebuggeeError>;
}
