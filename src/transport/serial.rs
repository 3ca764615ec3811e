//! Serial/USB transport implementation.
//!
//! Both controllers enumerate as USB CDC serial ports.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::protocol::encode_line;
use crate::transport::{LineReader, Transport};

/// Default baud rate for the controllers.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay between opening the port and draining it.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Default window during which stale bytes are drained after opening.
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before the port is drained.
    pub settle_delay: Duration,
    /// How long to keep discarding stale input.
    pub drain_window: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            drain_window: DEFAULT_DRAIN_WINDOW,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the settle delay.
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the drain window.
    #[must_use]
    pub const fn drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }
}

/// Serial transport for controller communication.
///
/// Uses split read/write halves so the read loop never blocks writes.
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<Arc<Mutex<WriteHalf<SerialStream>>>>,
    reader: Option<ReadHalf<SerialStream>>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            reader: None,
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }
}

/// Reads and discards whatever arrives during `window`.
async fn drain(stream: &mut SerialStream, window: Duration) -> usize {
    let mut buf = [0u8; 1024];
    let mut total = 0usize;

    let deadline = tokio::time::Instant::now() + window;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => total += n,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    total
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Ok(());
            }

            tracing::info!("opening serial port {}", self.config.port);

            let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            if let Err(e) = tokio_serial::SerialPort::write_request_to_send(&mut stream, false) {
                tracing::warn!("failed to set RTS: {}", e);
            }
            if let Err(e) = tokio_serial::SerialPort::clear(&stream, tokio_serial::ClearBuffer::All)
            {
                tracing::warn!("failed to clear port buffers: {}", e);
            }

            tokio::time::sleep(self.config.settle_delay).await;

            let drained = drain(&mut stream, self.config.drain_window).await;
            if drained > 0 {
                tracing::debug!("drained {} stale bytes from buffer", drained);
            }

            let (reader, writer) = tokio::io::split(stream);
            self.reader = Some(reader);
            self.writer = Some(Arc::new(Mutex::new(writer)));

            tracing::info!("serial port {} open", self.config.port);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.writer.is_some() || self.reader.is_some() {
                tracing::info!("closing serial port {}", self.config.port);
                self.writer = None;
                self.reader = None;
            }
            Ok(())
        })
    }

    fn send_line(&mut self, line: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let writer = self.writer.clone();
        Box::pin(async move {
            let writer = writer.ok_or(Error::NotConnected)?;
            let mut writer = writer.lock().await;

            writer.write_all(&encode_line(&line)).await?;
            writer.flush().await?;

            Ok(())
        })
    }

    fn take_reader(&mut self) -> Option<LineReader> {
        self.reader.take().map(LineReader::new)
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn port_name(&self) -> &str {
        &self.config.port
    }
}
