//! WebSocket client transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{Connection, Transport};
use crate::error::TransportError;

/// HTTP statuses on the upgrade request that mean the client is not allowed in.
const REJECTED_STATUSES: [u16; 2] = [401, 403];

/// Close codes a server uses to refuse the client: policy violation plus the
/// application-range mirrors of 401 and 403.
const REJECTED_CLOSE_CODES: [u16; 3] = [1008, 4401, 4403];

/// Connects to a `ws://` or `wss://` URL and reads text frames.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    description: String,
}

impl WebSocketTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            description: format!("websocket: {}", url),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws, _response)) => Ok(Box::new(WebSocketConnection { ws })),
            Err(WsError::Http(response)) if REJECTED_STATUSES.contains(&response.status().as_u16()) => Err(
                TransportError::Rejected(format!("upgrade refused with HTTP {}", response.status())),
            ),
            Err(WsError::Io(e)) => Err(TransportError::from(e)),
            Err(e) => Err(TransportError::Connect(e.to_string())),
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}

struct WebSocketConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn close_reason(frame: Option<CloseFrame<'_>>) -> Result<Option<String>, TransportError> {
    let Some(frame) = frame else {
        return Ok(None);
    };
    let code = u16::from(frame.code);
    if REJECTED_CLOSE_CODES.contains(&code) {
        return Err(TransportError::Rejected(format!("closed with code {}: {}", code, frame.reason)));
    }
    debug!(code, reason = %frame.reason, "websocket closed by server");
    Ok(None)
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.ws.next().await {
                None => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => return close_reason(frame),
                // Pings are answered by tungstenite on the next read
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(WsError::Io(e))) => return Err(TransportError::from(e)),
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
        let _ = self.ws.flush().await;
    }
}
