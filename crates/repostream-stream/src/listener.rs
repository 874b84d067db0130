//! `EventSource` trait: abstraction over the relay subscription.
//!
//! The websocket implementation lives in `ws_listener`; tests drive the
//! engine with scripted sources instead.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::StreamError;
use crate::frame::StreamMessage;

/// Decoded messages from one connection, in relay order.
///
/// The stream ends (or yields an `Err`) when the connection is lost.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<StreamMessage, StreamError>> + Send>>;

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Where this source connects, for logs.
    fn endpoint(&self) -> &str;

    /// Connect and start streaming, resuming after `cursor` when given.
    ///
    /// Connection failures are returned here rather than through the stream.
    async fn subscribe(&self, cursor: Option<i64>) -> Result<MessageStream, StreamError>;
}
