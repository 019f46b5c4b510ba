//! V8 inspector debuggee.
//!
//! Provides:
//! - CDP message types (`cdp`)
//! - `InspectorClient` - `Debuggee` over an inspector WebSocket

pub mod cdp;
pub mod client;

pub use client::{InspectorClient, InspectorError};
