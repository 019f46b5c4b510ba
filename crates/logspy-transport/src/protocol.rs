//! Wire protocol between the agent and the backend.
//!
//! Every frame is a JSON text message. Commands flow backend to agent,
//! [`AgentMessage`]s flow agent to backend; responses carry the `requestId`
//! of the command they answer and may arrive in any order.

use logspy_core::{BreakpointId, Location, LogpointHit, Script, ScriptId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend-assigned correlation id.
pub type RequestId = String;

/// Command frame as received, before the payload is decoded.
///
/// Decoding happens in two stages so that a command with an unknown or
/// malformed payload can still be answered under its `requestId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCommand {
    pub request_id: RequestId,
    pub request: Value,
}

impl RawCommand {
    #[must_use]
    pub fn new(request_id: impl Into<RequestId>, request: Value) -> Self {
        Self {
            request_id: request_id.into(),
            request,
        }
    }
}

/// Commands the agent serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "case", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    GetSources,
    GetScriptSource { script_id: ScriptId },
    AddLogpoint { script_id: ScriptId, line: u32 },
    RemoveLogpoint { breakpoint_id: BreakpointId },
    /// Remove whatever logpoints were requested at a line.
    RemoveLogpointAt { script_id: ScriptId, line: u32 },
}

const COMMAND_CASES: &[&str] = &[
    "getSources",
    "getScriptSource",
    "addLogpoint",
    "removeLogpoint",
    "removeLogpointAt",
];

/// Why a command payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Malformed command: {0}")]
    Malformed(String),
}

impl DecodeError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownCommand(_) => ErrorCode::UnknownCommand,
            Self::Malformed(_) => ErrorCode::InvalidArgument,
        }
    }
}

impl Command {
    /// Decode a command payload.
    ///
    /// # Errors
    /// Returns `UnknownCommand` for an unrecognized `case`, `Malformed` for a
    /// missing `case` or fields that do not fit the command.
    pub fn decode(request: Value) -> Result<Self, DecodeError> {
        let case = request
            .get("case")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::Malformed("missing case".to_string()))?;
        if !COMMAND_CASES.contains(&case) {
            return Err(DecodeError::UnknownCommand(case.to_string()));
        }
        serde_json::from_value(request).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// Wire name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetSources => "getSources",
            Self::GetScriptSource { .. } => "getScriptSource",
            Self::AddLogpoint { .. } => "addLogpoint",
            Self::RemoveLogpoint { .. } => "removeLogpoint",
            Self::RemoveLogpointAt { .. } => "removeLogpointAt",
        }
    }
}

/// Error classes reported on a command's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    UnknownCommand,
    Internal,
}

/// Answer to one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "case", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CommandResponse {
    GetSources {
        scripts: Vec<Script>,
    },
    GetScriptSource {
        script_id: ScriptId,
        source: String,
    },
    AddLogpoint {
        breakpoint_id: BreakpointId,
        actual_location: Location,
    },
    RemoveLogpoint {
        breakpoint_id: BreakpointId,
    },
    RemoveLogpointAt {
        breakpoint_ids: Vec<BreakpointId>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl CommandResponse {
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Message from agent to backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AgentMessage {
    Response {
        request_id: RequestId,
        response: CommandResponse,
    },
    LogpointHit(LogpointHit),
}

impl AgentMessage {
    #[must_use]
    pub fn response(request_id: impl Into<RequestId>, response: CommandResponse) -> Self {
        Self::Response {
            request_id: request_id.into(),
            response,
        }
    }

    /// Request id this message answers, if it is a response.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Response { request_id, .. } => Some(request_id),
            Self::LogpointHit(_) => None,
        }
    }
}

/// Session bootstrap request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSession {
    pub app_name: String,
    pub agent_version: String,
    pub argv: Vec<String>,
}

impl InitSession {
    /// Bootstrap request for this process.
    #[must_use]
    pub fn for_process(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            argv: std::env::args().collect(),
        }
    }
}

/// Session granted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
}

/// Error object in a bootstrap reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

/// Bootstrap reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitSessionReply {
    Granted(SessionInfo),
    Rejected { error: WireError },
}
