//! Stream engine configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What the dispatcher does when an event's delivery fails (after the
/// sink's own retries).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryFailurePolicy {
    /// Stop the stream. The failed event stays uncommitted in the cursor.
    #[default]
    Abort,
    /// Log it, count the event as done and keep going.
    Skip,
}

impl fmt::Display for DeliveryFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for DeliveryFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown delivery failure policy `{other}` (expected abort|skip)")),
        }
    }
}

/// Top-level streaming configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Relay base URL, e.g. `wss://bsky.network`.
    #[serde(default = "default_relay_host")]
    pub relay_host: String,
    /// Sent as the `User-Agent` header on the websocket upgrade.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Maximum number of repositories processed at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// Consecutive reconnect attempts before giving up.
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,
    /// Initial reconnect backoff in milliseconds (doubles per attempt).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// How often the resume cursor is persisted.
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
    /// Buffer between the socket reader task and the engine.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub on_delivery_error: DeliveryFailurePolicy,
}

fn default_relay_host() -> String { "wss://bsky.network".to_string() }
fn default_user_agent() -> String { concat!("repostream/", env!("CARGO_PKG_VERSION")).to_string() }
fn default_max_concurrency() -> u32 { 100 }
fn default_max_reconnects() -> u32 { 5 }
fn default_backoff_ms() -> u64 { 500 }
fn default_checkpoint_interval_secs() -> u64 { 10 }
fn default_channel_capacity() -> usize { 512 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            relay_host: default_relay_host(),
            user_agent: default_user_agent(),
            max_concurrency: default_max_concurrency(),
            max_reconnects: default_max_reconnects(),
            backoff_ms: default_backoff_ms(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            channel_capacity: default_channel_capacity(),
            on_delivery_error: DeliveryFailurePolicy::default(),
        }
    }
}

impl StreamConfig {
    pub fn for_relay(relay_host: impl Into<String>) -> Self {
        Self {
            relay_host: relay_host.into(),
            ..Default::default()
        }
    }

    /// Reconnect delay for the given 1-based attempt, capped at 64x the base.
    pub fn reconnect_delay(&self, attempt: u32) -> std::time::Duration {
        let factor = 2u64.pow(attempt.saturating_sub(1).min(6));
        std::time::Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}
