//! WebSocket backend client.
//!
//! `InitSession` is a single request/reply exchange on
//! `{base}/api/agent/session`; the command stream is a long-lived socket on
//! `{base}/api/agent/commands`. Both authenticate with a bearer token, and
//! the stream also names its session in `X-Logspy-Session-Id`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, StatusCode},
    },
};

use crate::{
    channel::{Backend, BackendError, InboundStream, OutboundStream},
    protocol::{InitSession, InitSessionReply, RawCommand, SessionInfo},
};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub const SESSION_HEADER: &str = "x-logspy-session-id";

/// Backend reached over WebSockets.
#[derive(Debug, Clone)]
pub struct WebSocketBackend {
    base_url: String,
    access_token: String,
}

impl WebSocketBackend {
    #[must_use]
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn connect(&self, path: &str, session: Option<&SessionInfo>) -> Result<Socket, BackendError> {
        let url = self.endpoint(path);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BackendError::InvalidArgument(format!("{url}: {e}")))?;

        let headers = request.headers_mut();
        headers.insert(
            "authorization",
            header(&format!("Bearer {}", self.access_token))?,
        );
        if let Some(session) = session {
            headers.insert(SESSION_HEADER, header(&session.session_id)?);
        }

        let (socket, _response) = connect_async(request).await.map_err(handshake_error)?;
        tracing::debug!(%url, "backend socket open");
        Ok(socket)
    }
}

fn header(value: &str) -> Result<HeaderValue, BackendError> {
    HeaderValue::from_str(value).map_err(|e| BackendError::InvalidArgument(e.to_string()))
}

fn handshake_error(e: tungstenite::Error) -> BackendError {
    match e {
        tungstenite::Error::Http(response) => rejected(response.status()),
        other => BackendError::Transport(other.to_string()),
    }
}

fn rejected(status: StatusCode) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendError::Unauthenticated(status.to_string())
        }
        StatusCode::BAD_REQUEST => BackendError::InvalidArgument(status.to_string()),
        _ => BackendError::Transport(format!("handshake rejected: {status}")),
    }
}

/// Decode one inbound frame. Frames that carry no command are skipped.
fn decode_frame(frame: Result<Message, tungstenite::Error>) -> Option<Result<RawCommand, BackendError>> {
    match frame {
        Ok(Message::Text(text)) => match serde_json::from_str::<RawCommand>(text.as_str()) {
            Ok(command) => Some(Ok(command)),
            Err(e) => {
                // no request id to answer under
                tracing::warn!(error = %e, "dropping undecodable command frame");
                None
            }
        },
        Ok(_) => None,
        Err(e) => Some(Err(BackendError::Transport(e.to_string()))),
    }
}

#[async_trait]
impl Backend for WebSocketBackend {
    async fn init_session(&self, request: &InitSession) -> Result<SessionInfo, BackendError> {
        let mut socket = self.connect("/api/agent/session", None).await?;

        let body = serde_json::to_string(request).map_err(|e| BackendError::Protocol(e.to_string()))?;
        socket
            .send(Message::text(body))
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let reply = loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(Message::Close(_))) | None => return Err(BackendError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(BackendError::Transport(e.to_string())),
            }
        };
        let _ = socket.close(None).await;

        match serde_json::from_str::<InitSessionReply>(reply.as_str()) {
            Ok(InitSessionReply::Granted(session)) => Ok(session),
            Ok(InitSessionReply::Rejected { error }) => {
                Err(BackendError::from_code(&error.code, error.message))
            }
            Err(e) => Err(BackendError::Protocol(e.to_string())),
        }
    }

    async fn open_stream(
        &self,
        session: &SessionInfo,
        mut outbound: OutboundStream,
    ) -> Result<InboundStream, BackendError> {
        let socket = self.connect("/api/agent/commands", Some(session)).await?;
        let (mut sink, source) = socket.split();

        tokio::spawn(async move {
            while let Some(message) = outbound.next().await {
                let json = match serde_json::to_string(&message) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {e}");
                        continue;
                    }
                };
                if sink.send(Message::text(json)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let inbound = source
            .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| future::ready(decode_frame(frame)))
            .boxed();
        Ok(inbound)
    }
}
