//! Data model shared by the session and transport layers.
//!
//! Field names follow the debuggee wire format (camelCase) so that inspector
//! notifications deserialize straight into these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque script identifier, unique per debuggee process.
pub type ScriptId = String;

/// Breakpoint identifier assigned by the debuggee.
pub type BreakpointId = String;

/// Handle to a live object inside the debuggee.
pub type ObjectId = String;

/// A unit of source code announced by the debuggee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    /// Debuggee-assigned identifier.
    pub script_id: ScriptId,
    /// Source URL, empty for synthetic scripts.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub start_column: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub end_column: u32,
    /// Whether the script is an ES module.
    #[serde(default)]
    pub is_module: bool,
}

impl Script {
    /// Create a script with the given id and url and zeroed extents.
    #[must_use]
    pub fn new(script_id: impl Into<ScriptId>, url: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            url: url.into(),
            start_line: 0,
            start_column: 0,
            end_line: 0,
            end_column: 0,
            is_module: false,
        }
    }

    /// Set the line/column extents.
    #[must_use]
    pub const fn with_extents(mut self, start: (u32, u32), end: (u32, u32)) -> Self {
        self.start_line = start.0;
        self.start_column = start.1;
        self.end_line = end.0;
        self.end_column = end.1;
        self
    }

    /// Whether the debuggee reported where the script ends.
    #[must_use]
    pub const fn has_extents(&self) -> bool {
        self.end_line > self.start_line || self.end_column > self.start_column
    }

    /// Whether `line` falls inside the script's extents. Any line is
    /// accepted when the extents are unknown.
    #[must_use]
    pub const fn contains_line(&self, line: u32) -> bool {
        !self.has_extents() || (line >= self.start_line && line <= self.end_line)
    }
}

/// A position inside a script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub script_id: ScriptId,
    pub line_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

impl Location {
    /// Location at the start of `line`, letting the debuggee pick the column.
    #[must_use]
    pub fn line(script_id: impl Into<ScriptId>, line_number: u32) -> Self {
        Self {
            script_id: script_id.into(),
            line_number,
            column_number: None,
        }
    }

    /// Set an explicit column.
    #[must_use]
    pub const fn with_column(mut self, column: u32) -> Self {
        self.column_number = Some(column);
        self
    }
}

/// Result of a successful set-breakpoint call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointPlacement {
    pub breakpoint_id: BreakpointId,
    /// Where the debuggee actually placed the breakpoint.
    pub actual_location: Location,
}

/// Type tag of a remote value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Object,
    Function,
    Undefined,
    String,
    Number,
    Boolean,
    Symbol,
    Bigint,
}

/// Mirror of a value living inside the debuggee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub kind: ValueKind,
    /// Refinement of `object`, e.g. `array`, `null`, `map`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Primitive value, when it is JSON representable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Primitive value that JSON cannot carry (`NaN`, `-0`, bigints).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unserializable_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Present when the value is an object that can be inspected further.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<ObjectId>,
}

impl RemoteObject {
    /// A primitive carrying a JSON value.
    #[must_use]
    pub fn primitive(kind: ValueKind, value: Value) -> Self {
        Self {
            kind,
            subtype: None,
            value: Some(value),
            unserializable_value: None,
            description: None,
            object_id: None,
        }
    }

    /// An inspectable object reference.
    #[must_use]
    pub fn object(object_id: impl Into<ObjectId>) -> Self {
        Self {
            kind: ValueKind::Object,
            subtype: None,
            value: None,
            unserializable_value: None,
            description: None,
            object_id: Some(object_id.into()),
        }
    }

    /// An inspectable array reference.
    #[must_use]
    pub fn array(object_id: impl Into<ObjectId>) -> Self {
        Self {
            subtype: Some("array".to_string()),
            ..Self::object(object_id)
        }
    }

    /// A function reference.
    #[must_use]
    pub fn function(object_id: impl Into<ObjectId>) -> Self {
        Self {
            kind: ValueKind::Function,
            ..Self::object(object_id)
        }
    }

    #[must_use]
    pub fn is_function(&self) -> bool {
        self.kind == ValueKind::Function
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.subtype.as_deref() == Some("array")
    }
}

/// One property of an inspected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    /// Absent for accessor properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RemoteObject>,
    #[serde(default = "default_true")]
    pub enumerable: bool,
}

const fn default_true() -> bool {
    true
}

impl PropertyDescriptor {
    /// An enumerable data property.
    #[must_use]
    pub fn new(name: impl Into<String>, value: RemoteObject) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            enumerable: true,
        }
    }

    /// Mark the property non-enumerable.
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.enumerable = false;
        self
    }
}

/// A lexical scope of a paused call frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// `local`, `block`, `closure`, `global`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Object whose properties are the scope's variables.
    pub object: RemoteObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A frame of the paused call stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub call_frame_id: String,
    #[serde(default)]
    pub function_name: String,
    pub location: Location,
    /// Innermost scope first.
    #[serde(default)]
    pub scope_chain: Vec<Scope>,
}

/// Payload of a pause notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    pub call_frames: Vec<CallFrame>,
    /// Why execution stopped: `other` for breakpoints, `exception`, ...
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub hit_breakpoints: Vec<BreakpointId>,
}

impl PausedEvent {
    /// Whether the pause was caused by a thrown exception or rejection.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        matches!(self.reason.as_str(), "exception" | "promiseRejection")
    }
}

/// Notifications pushed by the debuggee.
#[derive(Debug, Clone, PartialEq)]
pub enum DebuggeeEvent {
    ScriptParsed(Script),
    Paused(PausedEvent),
}

/// Variable state captured when a logpoint fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogpointHit {
    pub time: DateTime<Utc>,
    /// Every breakpoint reported at the pause, ours or not.
    pub breakpoint_ids: Vec<BreakpointId>,
    pub vars: Value,
}

impl LogpointHit {
    /// Stamp a hit with the current wall-clock time.
    #[must_use]
    pub fn now(breakpoint_ids: Vec<BreakpointId>, vars: Value) -> Self {
        Self {
            time: Utc::now(),
            breakpoint_ids,
            vars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_parsed_params_deserialize() {
        let json = r#"{
            "scriptId": "483",
            "url": "file:///srv/app/server.js",
            "startLine": 0,
            "startColumn": 0,
            "endLine": 14,
            "endColumn": 16,
            "executionContextId": 1,
            "hash": "0141ce681cff93c15817593ea95b572e6cbd2a1b",
            "isModule": true,
            "length": 302
        }"#;

        let script: Script = serde_json::from_str(json).unwrap();
        assert_eq!(script.script_id, "483");
        assert_eq!(script.end_line, 14);
        assert!(script.is_module);
        assert!(script.has_extents());
        assert!(script.contains_line(7));
        assert!(!script.contains_line(15));
    }

    #[test]
    fn test_unknown_extents_accept_any_line() {
        let script: Script = serde_json::from_str(r#"{"scriptId": "42", "url": "app.js"}"#).unwrap();
        assert!(!script.has_extents());
        assert!(script.contains_line(7));

        let one_line = Script::new("43", "inline.js").with_extents((0, 0), (0, 40));
        assert!(one_line.has_extents());
        assert!(one_line.contains_line(0));
        assert!(!one_line.contains_line(1));
    }

    #[test]
    fn test_paused_params_deserialize() {
        let json = r#"{
            "callFrames": [{
                "callFrameId": "cf-1",
                "functionName": "handler",
                "location": {"scriptId": "42", "lineNumber": 7, "columnNumber": 2},
                "url": "file:///srv/app/app.js",
                "scopeChain": [
                    {"type": "local", "object": {"type": "object", "objectId": "scope-1"}},
                    {"type": "global", "object": {"type": "object", "objectId": "scope-2"}}
                ],
                "this": {"type": "undefined"}
            }],
            "reason": "other",
            "hitBreakpoints": ["b1"]
        }"#;

        let paused: PausedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(paused.hit_breakpoints, vec!["b1".to_string()]);
        assert!(!paused.is_exception());

        let top = &paused.call_frames[0];
        assert_eq!(top.function_name, "handler");
        assert_eq!(top.location.column_number, Some(2));
        assert_eq!(top.scope_chain[0].object.object_id.as_deref(), Some("scope-1"));
    }

    #[test]
    fn test_paused_without_hit_breakpoints() {
        let json = r#"{"callFrames": [], "reason": "exception"}"#;
        let paused: PausedEvent = serde_json::from_str(json).unwrap();
        assert!(paused.hit_breakpoints.is_empty());
        assert!(paused.is_exception());
    }

    #[test]
    fn test_remote_object_kinds() {
        let func: RemoteObject =
            serde_json::from_str(r#"{"type": "function", "objectId": "f1", "className": "Function"}"#)
                .unwrap();
        assert!(func.is_function());

        let arr: RemoteObject =
            serde_json::from_str(r#"{"type": "object", "subtype": "array", "objectId": "a1"}"#).unwrap();
        assert!(arr.is_array());

        let nan: RemoteObject =
            serde_json::from_str(r#"{"type": "number", "unserializableValue": "NaN"}"#).unwrap();
        assert_eq!(nan.unserializable_value.as_deref(), Some("NaN"));
    }

    #[test]
    fn test_location_omits_missing_column() {
        let json = serde_json::to_value(Location::line("42", 7)).unwrap();
        assert_eq!(json, serde_json::json!({"scriptId": "42", "lineNumber": 7}));
    }
}
