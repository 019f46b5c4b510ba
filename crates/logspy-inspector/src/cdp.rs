//! Chrome DevTools Protocol framing.

use logspy_core::{BreakpointId, Location, PropertyDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing method call.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
}

/// Any frame the inspector sends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<ProtocolError>,
    },
    Notification {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

pub const SCRIPT_PARSED: &str = "Debugger.scriptParsed";
pub const PAUSED: &str = "Debugger.paused";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointResult {
    pub breakpoint_id: BreakpointId,
    pub actual_location: Location,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSourceResult {
    pub script_source: String,
}

#[derive(Debug, Deserialize)]
pub struct GetPropertiesResult {
    pub result: Vec<PropertyDescriptor>,
}
