//! Error types for muxwire.

use std::sync::Arc;

use thiserror::Error;

use crate::codec::Encoding;

/// Main error type for all muxwire operations.
#[derive(Debug, Error)]
pub enum MuxError {
    /// I/O error on the shared connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed envelope, oversized packet, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Packet body does not fit the 32-bit length field.
    #[error("pkt-codec: body too large ({0})")]
    BodyTooLarge(usize),

    /// Fewer bytes than announced were available for a frame.
    #[error("frame buffer: failed to consume whole body (expected {expected}, copied {copied})")]
    ShortBody { expected: u32, copied: u64 },

    /// Destination buffer is smaller than the next frame.
    #[error("buffer too small to hold frame ({needed} bytes, have {available})")]
    BufferTooSmall { needed: usize, available: usize },

    /// No frame is queued.
    #[error("frame buffer is empty")]
    EmptyBuffer,

    /// Appending the frame would exceed the configured per-call limit.
    #[error("frame buffer limit of {limit} bytes exceeded")]
    BufferLimit { limit: usize },

    /// Reply type does not match the requested encoding.
    #[error("unexpected request encoding, need {expected} got {requested}")]
    EncodingMismatch {
        expected: Encoding,
        requested: Encoding,
    },

    /// The call context was canceled.
    #[error("context canceled")]
    Canceled,

    /// The call context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The byte source is already closed.
    #[error("byte source canceled: {0}")]
    SourceClosed(String),

    /// The byte sink is already closed.
    #[error("byte sink is closed")]
    SinkClosed,

    /// The legacy stream adapter does not accept writes.
    #[error("can't pour into byte source")]
    ReadOnlyStream,

    /// The peer ended the call with an error packet.
    #[error("remote error ({name}): {message}")]
    Remote { name: String, message: String },

    /// All positive request ids have been handed out on this connection.
    #[error("request ids exhausted on this connection")]
    RequestIdsExhausted,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Terminal error recorded on a byte source.
    #[error("{0}")]
    Source(Arc<MuxError>),

    /// Error annotated with the call it belongs to.
    #[error("muxrpc({method}) req {req}: {source}")]
    Call {
        method: String,
        req: i32,
        #[source]
        source: Box<MuxError>,
    },
}

impl MuxError {
    /// Wrap this error with the method and request id of a call.
    pub fn in_call(self, method: impl ToString, req: i32) -> Self {
        MuxError::Call {
            method: method.to_string(),
            req,
            source: Box::new(self),
        }
    }

    /// Strip call annotations and stored-source wrappers.
    pub fn root(&self) -> &MuxError {
        match self {
            MuxError::Call { source, .. } => source.root(),
            MuxError::Source(inner) => inner.root(),
            other => other,
        }
    }
}

/// Result type alias using MuxError.
pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_call_wraps_method_and_req() {
        let err = MuxError::EmptyBuffer.in_call("whoami", 7);
        let msg = err.to_string();
        assert!(msg.contains("whoami"));
        assert!(msg.contains("req 7"));
        assert!(matches!(err.root(), MuxError::EmptyBuffer));
    }

    #[test]
    fn test_root_unwraps_stored_source() {
        let stored = Arc::new(MuxError::ConnectionClosed);
        let err = MuxError::Source(stored).in_call("a.b", 1);
        assert!(matches!(err.root(), MuxError::ConnectionClosed));
    }
}
