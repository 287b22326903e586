//! Error types for the lancall transport layer.
//!
//! All fallible operations return `Result<T, CallError>`.
//! Malformed network input maps to typed wire variants and is dropped
//! by the receive path; no error in this layer is fatal to the process.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the lancall transport layer.
#[derive(Debug, Error)]
pub enum CallError {
    // ── Wire Errors ──────────────────────────────────────────────
    /// The datagram carried a tag that maps to no known message kind.
    #[error("unknown message tag: {0:?}")]
    UnknownTag(String),

    /// The datagram ended before a complete field could be read.
    #[error("truncated datagram while reading {0}")]
    Truncated(&'static str),

    /// A field was present but failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    /// The datagram exceeds the maximum size the codec accepts.
    #[error("datagram too large: {size} bytes (max {max})")]
    DatagramTooLarge { size: usize, max: usize },

    /// Encoding or decoding of a message body failed.
    #[error("body encoding error: {0}")]
    Encoding(String),

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    // ── Transport Errors ─────────────────────────────────────────
    /// The UDP layer reported an error (bind, send, receive).
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Session Errors ───────────────────────────────────────────
    /// A send was requested while no remote peer is discovered.
    #[error("no peer discovered")]
    NoPeer,

    /// Requested parameters violate an invariant (e.g. buffer
    /// target >= max).
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

// ── Convenient From implementations ──────────────────────────────

impl From<Box<bincode::ErrorKind>> for CallError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CallError::Encoding(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CallError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CallError::ChannelClosed
    }
}
