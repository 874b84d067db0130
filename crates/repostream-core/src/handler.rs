//! The seam between the stream dispatcher and event processing.

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::event::CommitEvent;

/// Processes one commit event.
///
/// Only delivery failures are returned; every other problem with an event
/// is logged and absorbed by the implementation.
#[async_trait]
pub trait CommitHandler: Send + Sync {
    async fn handle_commit(&self, event: &CommitEvent) -> Result<(), DeliveryError>;
}
