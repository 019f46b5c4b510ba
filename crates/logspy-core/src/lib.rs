//! Core abstractions for the logspy agent.
//!
//! This crate provides the fundamental building blocks:
//! - Data model shared with the debuggee and the backend (`Script`, `PausedEvent`, `LogpointHit`)
//! - `Debuggee` - the execution engine's debug protocol
//! - `Emitter` / `EventBridge` - push to pull event bridging, plus `merge`

pub mod bridge;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{BridgeCloser, Emitter, EventBridge, merge};
pub use traits::{Debuggee, DebuggeeError, DebuggeeEventSender, DebuggeeEvents, event_channel};
pub use types::{
    BreakpointId, BreakpointPlacement, CallFrame, DebuggeeEvent, Location, LogpointHit, ObjectId,
    PausedEvent, PropertyDescriptor, RemoteObject, Scope, Script, ScriptId, ValueKind,
};
