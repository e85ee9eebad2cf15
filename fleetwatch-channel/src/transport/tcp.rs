//! Newline-delimited JSON over a byte stream.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;

use super::{Connection, Transport};
use crate::error::TransportError;

/// Connects to `host:port` and reads one JSON frame per line.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    description: String,
}

impl TcpTransport {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            description: format!("tcp: {}", addr),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", self.addr, e)))?;
        Ok(Box::new(LineConnection::new(stream)))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// A [`Connection`] over any async reader providing newline-delimited frames.
///
/// Blank lines are skipped.
#[derive(Debug)]
pub struct LineConnection<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R> LineConnection<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }
}

#[async_trait]
impl<R> Connection for LineConnection<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line).await {
                // EOF
                Ok(0) => return Ok(None),
                Ok(_) => {
                    let frame = self.line.trim();
                    if !frame.is_empty() {
                        return Ok(Some(frame.to_string()));
                    }
                }
                Err(e) => return Err(TransportError::from(e)),
            }
        }
    }
}
