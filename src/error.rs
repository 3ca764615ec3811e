//! Error types for the picolab library.

use thiserror::Error;

/// The main error type for picolab operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error.
    #[error("line error: {0}")]
    Line(#[from] LineError),

    /// The link to the device was lost.
    #[error("transport failure: {reason}")]
    Transport { reason: String },

    /// The device answered the identification ping with the wrong banner.
    #[error("connected to the wrong device: expected `{expected}`, got `{received}`")]
    DeviceMismatch { expected: String, received: String },

    /// A response did not match its tag's grammar.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A status line referenced actuators missing from the configuration.
    #[error("status references unknown actuators {ids:?}")]
    Consistency { ids: Vec<u32> },

    /// The firmware replied with an `Error:` line.
    #[error("device error: {message}")]
    Device { message: String },

    /// Request timed out waiting for its expected response.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Session is not connected.
    #[error("not connected")]
    NotConnected,

    /// An argument was rejected before anything was sent.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The recipe timeline failed validation.
    #[error("invalid timeline: {reason}")]
    InvalidTimeline { reason: String },

    /// The scheduler refused to start a run.
    #[error("scheduler aborted: {reason}")]
    SchedulerAbort { reason: String },

    /// Internal channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Returns true for failures of the serial link itself.
    ///
    /// These always force the owning session to disconnect.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Serial(_) | Self::Io(_) | Self::Line(_) | Self::Transport { .. }
        )
    }

    pub(crate) fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Line framing errors.
#[derive(Debug, Error)]
pub enum LineError {
    /// No newline arrived before the buffer limit.
    #[error("line too long: {size} bytes exceeds maximum {max}")]
    TooLong { size: usize, max: usize },
}

/// Response grammar errors.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The text does not follow the tag's grammar.
    #[error("malformed {tag} response: {detail}")]
    Grammar { tag: &'static str, detail: String },

    /// Embedded JSON payload is invalid.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedded timestamp is invalid.
    #[error("invalid timestamp: {0}")]
    Time(#[from] chrono::ParseError),
}

impl ParseError {
    pub(crate) fn grammar(tag: &'static str, detail: impl Into<String>) -> Self {
        Self::Grammar {
            tag,
            detail: detail.into(),
        }
    }
}

/// Result type alias for picolab operations.
pub type Result<T> = std::result::Result<T, Error>;
