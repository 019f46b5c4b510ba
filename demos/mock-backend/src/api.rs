//! HTTP control API used to drive the connected agent.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use logspy_transport::{Command, CommandResponse, ErrorCode};
use serde::Deserialize;
use serde_json::json;

use crate::state::{AppState, RequestError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLogpoint {
    pub script_id: String,
    pub line: u32,
}

const fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidArgument | ErrorCode::UnknownCommand => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn into_response(result: Result<CommandResponse, RequestError>) -> Response {
    match result {
        Ok(CommandResponse::Error { code, message }) => (
            status_for(code),
            Json(json!({"code": code, "message": message})),
        )
            .into_response(),
        Ok(response) => Json(response).into_response(),
        Err(RequestError::NoAgent) => {
            (StatusCode::SERVICE_UNAVAILABLE, "no agent connected").into_response()
        }
        Err(RequestError::Disconnected) => {
            (StatusCode::BAD_GATEWAY, "agent disconnected").into_response()
        }
        Err(RequestError::Timeout) => {
            (StatusCode::GATEWAY_TIMEOUT, "agent did not answer").into_response()
        }
    }
}

pub async fn list_scripts(State(state): State<AppState>) -> Response {
    into_response(state.request(Command::GetSources).await)
}

pub async fn script_source(State(state): State<AppState>, Path(script_id): Path<String>) -> Response {
    into_response(state.request(Command::GetScriptSource { script_id }).await)
}

pub async fn add_logpoint(
    State(state): State<AppState>,
    Json(body): Json<NewLogpoint>,
) -> Response {
    into_response(
        state
            .request(Command::AddLogpoint {
                script_id: body.script_id,
                line: body.line,
            })
            .await,
    )
}

pub async fn remove_logpoint(
    State(state): State<AppState>,
    Path(breakpoint_id): Path<String>,
) -> Response {
    into_response(state.request(Command::RemoveLogpoint { breakpoint_id }).await)
}

pub async fn remove_logpoints_at(
    State(state): State<AppState>,
    Path((script_id, line)): Path<(String, u32)>,
) -> Response {
    into_response(state.request(Command::RemoveLogpointAt { script_id, line }).await)
}

pub async fn list_hits(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hits().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = into_response(Ok(CommandResponse::error(ErrorCode::NotFound, "gone")));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let invalid = into_response(Ok(CommandResponse::error(ErrorCode::InvalidArgument, "line")));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let ok = into_response(Ok(CommandResponse::RemoveLogpoint {
            breakpoint_id: "b1".to_string(),
        }));
        assert_eq!(ok.status(), StatusCode::OK);

        assert_eq!(
            into_response(Err(RequestError::NoAgent)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            into_response(Err(RequestError::Timeout)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_new_logpoint_body() {
        let body: NewLogpoint = serde_json::from_str(r#"{"scriptId":"42","line":7}"#).unwrap();
        assert_eq!(body.script_id, "42");
        assert_eq!(body.line, 7);
    }
}
