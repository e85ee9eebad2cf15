//! Transport abstraction for reaching the telemetry endpoint.
//!
//! A [`Transport`] knows how to open a connection; a [`Connection`] yields
//! inbound text frames until it closes. The supervisor owns reconnect policy,
//! so implementations make exactly one attempt per `connect` call.

mod channel;
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use channel::{ChannelTransport, FrameSender};
pub use tcp::{LineConnection, TcpTransport};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;

/// Opens connections to a telemetry endpoint.
///
/// # Example
///
/// ```
/// use fleetwatch_channel::transport::{ChannelTransport, Transport};
///
/// let (_sender, transport) = ChannelTransport::create("in-process");
/// assert_eq!(transport.description(), "channel: in-process");
/// ```
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Make a single connection attempt.
    ///
    /// Return [`TransportError::Rejected`] when the endpoint refuses the
    /// client for good (e.g. bad credentials); anything else is retried.
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Human-readable description of the endpoint, used in logs.
    fn description(&self) -> &str;
}

/// An open connection delivering text frames.
#[async_trait]
pub trait Connection: Send {
    /// Wait for the next frame.
    ///
    /// `Ok(None)` means the peer closed cleanly.
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the connection. Dropping also closes it, less politely.
    async fn close(&mut self) {}
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        (**self).connect().await
    }

    fn description(&self) -> &str {
        (**self).description()
    }
}

/// Pick a transport from an endpoint URL.
///
/// `ws://` and `wss://` use the WebSocket transport, `tcp://host:port` reads
/// newline-delimited JSON over plain TCP.
pub fn from_url(url: &str) -> Result<Arc<dyn Transport>, TransportError> {
    if let Some(addr) = url.strip_prefix("tcp://") {
        return Ok(Arc::new(TcpTransport::new(addr)));
    }
    #[cfg(feature = "websocket")]
    if url.starts_with("ws://") || url.starts_with("wss://") {
        return Ok(Arc::new(WebSocketTransport::new(url)));
    }
    Err(TransportError::Connect(format!("unsupported endpoint: {}", url)))
}
