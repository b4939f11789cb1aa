//! Domain-specific error types for the drift client.
//!
//! All fallible operations return `Result<T, DriftError>`.
//! Malformed input from the peer never panics; every error is typed.

use std::time::Duration;
use thiserror::Error;

use crate::input::KeyCode;

/// The canonical error type for the drift client.
#[derive(Debug, Error)]
pub enum DriftError {
    // ── Framing Errors ───────────────────────────────────────────
    /// Bytes received from the peer could not be framed as an instruction.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    // ── Connection Errors ────────────────────────────────────────
    /// An action required an open tunnel or an active session.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Semantic Errors ──────────────────────────────────────────
    /// The logical key has no keysym mapping.
    #[error("invalid key code: {0:?}")]
    InvalidKeyCode(KeyCode),

    /// An instruction argument was missing or not parseable.
    #[error("invalid argument {index} for '{opcode}'")]
    InvalidArgument { opcode: String, index: usize },

    /// A stream did not hold a decodable image.
    #[error("image decode failed: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// A blob chunk was not valid base64.
    #[error("invalid base64 chunk: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The server reported an error.
    #[error("server error {status}: {message}")]
    Server { message: String, status: String },

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── ProtocolError ─────────────────────────────────────────────────

/// Framing failures raised while decoding `len.elem,...;` frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// No `.` was found where a length prefix should end.
    #[error("instruction without length delimiter")]
    MissingLengthDelimiter,

    /// The length prefix is not a non-negative decimal integer.
    #[error("instruction with invalid length")]
    InvalidLength,

    /// The declared rune count overruns the frame or hits invalid UTF-8.
    #[error("instruction with invalid rune")]
    InvalidRune,

    /// An element is followed by neither `,` nor `;`.
    #[error("instruction without separator")]
    MissingSeparator,

    /// A pending frame exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for DriftError {
    fn from(s: String) -> Self {
        DriftError::Other(s)
    }
}

impl From<&str> for DriftError {
    fn from(s: &str) -> Self {
        DriftError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DriftError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DriftError::ChannelClosed
    }
}
