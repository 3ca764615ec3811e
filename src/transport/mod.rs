//! Transport layer for controller communication.
//!
//! This module provides the abstraction over the serial link. A transport
//! writes command lines and hands out a [`LineReader`] for the receive side,
//! so reads never contend with writes.

#[cfg(test)]
pub(crate) mod mock;
pub mod serial;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::LineDecoder;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Opens the link and discards anything already buffered.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Closes the link. Closing a closed link is a no-op.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Writes one command line; the terminator is appended.
    fn send_line(&mut self, line: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Takes the receive side. Only the first call after `connect` yields it.
    fn take_reader(&mut self) -> Option<LineReader>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;

    /// Port the transport talks to.
    fn port_name(&self) -> &str;
}

/// Receive side of a transport, yielding complete lines.
pub struct LineReader {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    decoder: LineDecoder,
}

impl LineReader {
    /// Wraps a byte stream.
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            decoder: LineDecoder::new(),
        }
    }

    /// Reads the next non-empty line.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the stream ends or fails, or a line error
    /// when the peer sends an over-long line.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut buf = [0u8; 1024];

        loop {
            while let Some(line) = self.decoder.decode()? {
                if !line.is_empty() {
                    return Ok(line);
                }
            }

            let n = self.reader.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "serial port closed",
                )));
            }
            tracing::trace!("received {} bytes", n);
            self.decoder.feed(&buf[..n]);
        }
    }

    /// Reads the next non-empty line within `timeout`.
    pub async fn read_line_timeout(&mut self, timeout: Duration) -> Result<String> {
        tokio::time::timeout(timeout, self.read_line())
            .await
            .map_err(|_| Error::timeout(timeout))?
    }

    /// Forwards lines to `line_tx` until the link fails or the receiver goes away.
    ///
    /// This should be spawned as a separate task.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the connection is lost.
    pub async fn run(mut self, line_tx: mpsc::Sender<String>) -> Result<()> {
        loop {
            let line = match self.read_line().await {
                Ok(line) => line,
                Err(Error::Line(e)) => {
                    tracing::warn!("line decode error: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            tracing::trace!("rx: {}", line);
            if line_tx.send(line).await.is_err() {
                tracing::debug!("line receiver dropped");
                return Ok(());
            }
        }
    }
}

pub use serial::{SerialConfig, SerialTransport};

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn test_read_line_skips_blank_lines() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut reader = LineReader::new(host);

        device.write_all(b"\r\n\nPico Pump").await.unwrap();
        device.write_all(b" Control Version 2.0\r\n").await.unwrap();

        let line = reader.read_line().await.unwrap();
        assert_eq!(line, "Pico Pump Control Version 2.0");
    }

    #[tokio::test]
    async fn test_read_line_eof() {
        let (device, host) = tokio::io::duplex(64);
        let mut reader = LineReader::new(host);
        drop(device);

        let err = reader.read_line().await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line_timeout() {
        let (_device, host) = tokio::io::duplex(64);
        let mut reader = LineReader::new(host);

        let err = reader
            .read_line_timeout(Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { timeout_ms: 2000 }));
    }

    #[tokio::test]
    async fn test_run_forwards_lines() {
        let (mut device, host) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(LineReader::new(host).run(tx));

        device.write_all(b"a\nb\n").await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));

        drop(device);
        assert!(task.await.unwrap().is_err());
    }
}
