//! Line framing for the controller serial protocol.
//!
//! Both firmwares speak newline-terminated ASCII:
//! ```text
//! 0:ping\n                      host -> controller
//! Pico Pump Control Version 2.0\r\n  controller -> host
//! ```
//! Carriage returns and surrounding whitespace are stripped.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::LineError;

/// Line terminator.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Longest line accepted before the decoder gives up on the buffer.
pub const MAX_LINE_LEN: usize = 4096;

/// Encodes a command line, appending the terminator.
#[must_use]
pub fn encode(line: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(line.len() + 1);
    buf.put_slice(line.as_bytes());
    buf.put_u8(LINE_TERMINATOR);
    buf.freeze()
}

/// Line decoder that handles partial reads.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
}

impl LineDecoder {
    /// Creates a new line decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete line.
    ///
    /// Returns `Ok(Some(line))` for a complete (trimmed, possibly empty) line
    /// and `Ok(None)` if more data is needed. Invalid UTF-8 is replaced
    /// rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns `LineError::TooLong` when no terminator arrives within
    /// `MAX_LINE_LEN` bytes. The buffered bytes are discarded.
    pub fn decode(&mut self) -> Result<Option<String>, LineError> {
        let Some(pos) = self.buffer.iter().position(|&b| b == LINE_TERMINATOR) else {
            if self.buffer.len() > MAX_LINE_LEN {
                let size = self.buffer.len();
                self.buffer.clear();
                return Err(LineError::TooLong {
                    size,
                    max: MAX_LINE_LEN,
                });
            }
            return Ok(None);
        };

        let raw = self.buffer.split_to(pos + 1);
        let line = String::from_utf8_lossy(&raw[..pos]);
        Ok(Some(line.trim().to_string()))
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
