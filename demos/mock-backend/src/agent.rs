//! WebSocket endpoints the agent connects to.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use logspy_transport::{
    AgentMessage, InitSession, InitSessionReply, SessionInfo, WireError, websocket::SESSION_HEADER,
};
use tokio::sync::mpsc;

use crate::state::AppState;

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

/// `GET /api/agent/session`: one request, one reply.
pub async fn session_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if !state.is_authorized(authorization(&headers)) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(|socket| handle_session(socket, state))
}

async fn handle_session(mut socket: WebSocket, state: AppState) {
    let Some(Ok(Message::Text(text))) = socket.recv().await else {
        tracing::warn!("agent closed before sending InitSession");
        return;
    };

    let reply = match serde_json::from_str::<InitSession>(text.as_str()) {
        Ok(init) if !init.app_name.trim().is_empty() => {
            tracing::info!(app_name = %init.app_name, version = %init.agent_version, "agent connected");
            InitSessionReply::Granted(SessionInfo {
                session_id: state.open_session(&init.app_name).await,
            })
        }
        Ok(_) => rejected("appName is required"),
        Err(e) => rejected(&e.to_string()),
    };

    match serde_json::to_string(&reply) {
        Ok(json) => {
            let _ = socket.send(Message::Text(json.into())).await;
        }
        Err(e) => tracing::error!(error = %e, "failed to encode session reply"),
    }
    let _ = socket.close().await;
}

fn rejected(message: &str) -> InitSessionReply {
    InitSessionReply::Rejected {
        error: WireError {
            code: "invalid_argument".to_string(),
            message: message.to_string(),
        },
    }
}

/// `GET /api/agent/commands`: the long-lived command stream.
pub async fn commands_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if !state.is_authorized(authorization(&headers)) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let Some(session_id) = session_id else {
        return (StatusCode::BAD_REQUEST, "missing session id").into_response();
    };
    if !state.has_session(&session_id).await {
        return (StatusCode::BAD_REQUEST, "unknown session id").into_response();
    }
    ws.on_upgrade(move |socket| handle_commands(socket, state, session_id))
}

async fn handle_commands(socket: WebSocket, state: AppState, session_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.attach_agent(&session_id, tx).await;
    tracing::info!(%session_id, "command stream open");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => handle_agent_message(&state, text.as_str()).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.detach_agent(&session_id).await;
    send_task.abort();
    tracing::info!(%session_id, "command stream closed");
}

async fn handle_agent_message(state: &AppState, text: &str) {
    match serde_json::from_str::<AgentMessage>(text) {
        Ok(AgentMessage::Response {
            request_id,
            response,
        }) => state.complete(&request_id, response).await,
        Ok(AgentMessage::LogpointHit(hit)) => state.record_hit(hit).await,
        Err(e) => tracing::warn!(error = %e, "undecodable agent message"),
    }
}
