//! Socket transport

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Transport level failures. They never leave the connection manager:
/// each one becomes a state transition.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Open timed out")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Parameters of one open attempt
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectRequest {
    pub url: String,
    /// Access credential sent as connection metadata
    pub token: Option<String>,
}

/// Opens links to the backend
pub trait Connector: Send + Sync + 'static {
    type Link: Link;

    fn open(
        &self,
        request: ConnectRequest,
    ) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// An open, bidirectional text channel
pub trait Link: Send + 'static {
    fn send_text(&mut self, text: String)
        -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next text frame; `None` once the peer closed. Must be cancel safe.
    fn next_text(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// WebSocket connector
#[derive(Clone, Debug, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    type Link = WebSocketLink;

    async fn open(&self, request: ConnectRequest) -> Result<WebSocketLink, TransportError> {
        let mut req = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        if let Some(token) = &request.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            req.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = connect_async(req)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(url = %request.url, status = %response.status(), "WebSocket handshake complete");

        Ok(WebSocketLink { stream })
    }
}

pub struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Link for WebSocketLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Peer closed the socket");
                    return None;
                }
                // protocol level ping/pong is answered by tungstenite
                Ok(other) => trace!(len = other.len(), "Ignoring non-text frame"),
                Err(e) => return Some(Err(TransportError::Socket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!(error = %e, "Close handshake failed");
        }
    }
}
