//! Stream-level error types.

use repostream_core::error::{CidError, DeliveryError};
use thiserror::Error;

/// Failures of the relay connection or of the stream as a whole.
///
/// Everything here ends the run; per-event problems never surface as a
/// `StreamError`.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid relay endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("stream closed by relay")]
    Closed,

    #[error("websocket transport error: {0}")]
    Transport(String),

    #[error("relay sent error frame {error}: {message}")]
    Remote { error: String, message: String },

    #[error("gave up after {attempts} reconnect attempts")]
    ReconnectsExhausted { attempts: u32 },

    #[error("delivery failed for {repo} at seq {seq}: {source}")]
    DeliveryFailed {
        repo: String,
        seq: i64,
        #[source]
        source: DeliveryError,
    },

    #[error("cursor store: {0}")]
    Cursor(#[from] CursorStoreError),
}

impl StreamError {
    /// Errors after which reconnecting cannot help.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Closed | Self::Transport(_))
    }
}

/// A binary frame that could not be decoded.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame header: {reason}")]
    Header { reason: String },

    #[error("missing required field `{field}` in {kind} frame")]
    MissingField { kind: String, field: &'static str },

    #[error("invalid CID in frame: {0}")]
    Cid(#[from] CidError),

    #[error("CBOR decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

#[derive(Debug, Error)]
pub enum CursorStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cursor file: {0}")]
    Serde(#[from] serde_json::Error),
}
