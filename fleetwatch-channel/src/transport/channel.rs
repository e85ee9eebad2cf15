//! In-process transport fed through a tokio channel.
//!
//! Useful when frames already arrive through some other pipe (an embedded
//! message bus, a test harness) and only need the channel's bookkeeping.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use super::{Connection, Transport};
use crate::error::TransportError;

#[derive(Debug)]
enum Feed {
    Frame(String),
    Drop,
}

/// Sending half of a [`ChannelTransport`].
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<Feed>,
}

impl FrameSender {
    /// Queue a text frame. Returns `false` once the transport is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.tx.send(Feed::Frame(frame.into())).is_ok()
    }

    /// End the current connection as if the peer hung up. Frames queued
    /// after this are delivered on the next connection.
    pub fn drop_connection(&self) -> bool {
        self.tx.send(Feed::Drop).is_ok()
    }
}

/// A transport whose single endpoint is the paired [`FrameSender`].
///
/// Only one connection is open at a time; a later `connect` waits for the
/// previous connection to be dropped.
#[derive(Debug)]
pub struct ChannelTransport {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Feed>>>,
    description: String,
}

impl ChannelTransport {
    /// Create a sender/transport pair.
    pub fn create(source_description: &str) -> (FrameSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            rx: Arc::new(Mutex::new(rx)),
            description: format!("channel: {}", source_description),
        };
        (FrameSender { tx }, transport)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let rx = self.rx.clone().lock_owned().await;
        Ok(Box::new(ChannelConnection { rx }))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

struct ChannelConnection {
    rx: OwnedMutexGuard<mpsc::UnboundedReceiver<Feed>>,
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        match self.rx.recv().await {
            Some(Feed::Frame(frame)) => Ok(Some(frame)),
            Some(Feed::Drop) => Ok(None),
            None => Err(TransportError::Closed("all senders dropped".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_frames_in_order() {
        let (tx, transport) = ChannelTransport::create("test");
        tx.send("one");
        tx.send("two");

        let mut conn = transport.connect().await.unwrap();
        assert_eq!(conn.next_frame().await.unwrap().as_deref(), Some("one"));
        assert_eq!(conn.next_frame().await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn drop_connection_ends_current_connection_only() {
        let (tx, transport) = ChannelTransport::create("test");
        tx.drop_connection();
        tx.send("after");

        let mut conn = transport.connect().await.unwrap();
        assert_eq!(conn.next_frame().await.unwrap(), None);
        drop(conn);

        let mut conn = transport.connect().await.unwrap();
        assert_eq!(conn.next_frame().await.unwrap().as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn closed_when_senders_dropped() {
        let (tx, transport) = ChannelTransport::create("test");
        drop(tx);
        let mut conn = transport.connect().await.unwrap();
        assert!(matches!(conn.next_frame().await, Err(TransportError::Closed(_))));
    }
}
