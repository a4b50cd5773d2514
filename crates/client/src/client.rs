//! WebSocket + STOMP client for the board event stream.
//!
//! [`RetroClient`] holds the connection configuration. Call
//! [`RetroClient::connect`] to open a WebSocket, perform the STOMP
//! handshake and get back a live [`StompConnection`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::auth::TokenProvider;
use crate::stomp::{parse_frame, StompCommand, StompFrame};

/// Upper bound on waiting for `CONNECTED` after the socket opens.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// The raw socket type produced by `tokio-tungstenite`.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the board event stream endpoint.
pub struct RetroClient {
    ws_url: String,
    tokens: Arc<dyn TokenProvider>,
}

/// A WebSocket on which the STOMP handshake has completed.
pub struct StompConnection {
    /// Client-side id used to correlate log lines for this socket.
    pub connection_id: String,
    /// `session` header from `CONNECTED`, when the server sends one.
    pub server_session: Option<String>,
    pub ws_stream: WsStream,
}

impl RetroClient {
    /// * `ws_url` - WebSocket endpoint, e.g. `ws://host:8080/websocket/websocket`.
    pub fn new(ws_url: String, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { ws_url, tokens }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open the socket and complete the STOMP handshake.
    ///
    /// The bearer token is read fresh from the provider on every call, so
    /// reconnects pick up a refreshed token.
    pub async fn connect(&self) -> Result<StompConnection, ClientError> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        let (mut ws_stream, _response) = connect_async(&self.ws_url).await.map_err(|e| {
            ClientError::Connection(format!("Failed to connect to {}: {e}", self.ws_url))
        })?;

        let token = self.tokens.token();
        let handshake = StompFrame::connect(host_of(&self.ws_url), token.as_deref());
        ws_stream
            .send(Message::Text(handshake.encode()))
            .await
            .map_err(|e| ClientError::Connection(format!("Failed to send CONNECT: {e}")))?;

        let connected = tokio::time::timeout(HANDSHAKE_TIMEOUT, await_connected(&mut ws_stream))
            .await
            .map_err(|_| ClientError::Protocol("Timed out waiting for CONNECTED".into()))??;

        let server_session = connected.header("session").map(str::to_string);

        tracing::info!(
            connection_id = %connection_id,
            server_session = server_session.as_deref().unwrap_or("-"),
            "Connected to board event stream at {}",
            self.ws_url,
        );

        Ok(StompConnection {
            connection_id,
            server_session,
            ws_stream,
        })
    }
}

/// Read frames until the server accepts or refuses the handshake.
async fn await_connected(ws_stream: &mut WsStream) -> Result<StompFrame, ClientError> {
    while let Some(msg) = ws_stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                return Err(ClientError::Connection(format!(
                    "Socket closed during handshake: {frame:?}"
                )));
            }
            Ok(_) => continue,
            Err(e) => {
                return Err(ClientError::Connection(format!(
                    "Socket error during handshake: {e}"
                )));
            }
        };

        match parse_frame(&text) {
            Ok(Some(frame)) if frame.command == StompCommand::Connected => return Ok(frame),
            Ok(Some(frame)) if frame.command == StompCommand::Error => {
                let reason = frame
                    .header("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| frame.body.clone());
                return Err(ClientError::Rejected(reason));
            }
            Ok(Some(frame)) => {
                tracing::debug!(
                    command = frame.command.as_str(),
                    "Ignoring frame before CONNECTED",
                );
            }
            Ok(None) => {}
            Err(e) => return Err(ClientError::Protocol(format!("Bad handshake frame: {e}"))),
        }
    }
    Err(ClientError::Connection("Socket ended during handshake".into()))
}

/// Host part of a URL, used for the STOMP `host` header.
fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(|c: char| c == '/' || c == ':' || c == '?')
        .next()
        .unwrap_or(rest)
}

/// Errors that can occur when opening the event stream.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure. Retried by the channel.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The peer spoke something other than STOMP. Retried by the channel.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered the handshake with an ERROR frame.
    /// Not retried: the token needs attention first.
    #[error("Handshake rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::Rejected(_))
    }
}
