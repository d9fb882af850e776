//! Pluggable transport beneath the session driver.
//!
//! The session logic only sees [`Connector`] and [`Connection`], so tests
//! drive the full reconnect/queue/resubscribe behavior against an in-memory
//! mock. The production implementation speaks WebSocket via
//! tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{ClientMessage, ServerEvent};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::ClientError;

/// One live bidirectional connection.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError>;
    /// Next decoded server event; `None` once the connection is gone.
    async fn recv(&mut self) -> Option<ServerEvent>;
    async fn close(&mut self);
}

/// Opens connections. `connect` is handed the full URL including the
/// `?token=` credential.
#[async_trait]
pub trait Connector: Send {
    type Conn: Connection;
    async fn connect(&mut self, url: &str) -> Result<Self::Conn, ClientError>;
}

/// WebSocket transport.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&mut self, url: &str) -> Result<WsConnection, ClientError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(WsConnection { stream })
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let json =
            serde_json::to_string(message).map_err(|e| ClientError::Transport(e.to_string()))?;
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<ServerEvent> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                    Ok(event) => return Some(event),
                    Err(e) => {
                        tracing::warn!(error = %e, "Discarding undecodable frame");
                    }
                },
                // tungstenite answers pings on our behalf during read
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    tracing::debug!(reason = ?frame, "Server closed the connection");
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    return None;
                }
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
