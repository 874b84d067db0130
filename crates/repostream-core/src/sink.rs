//! Delivery sinks: where serialized envelopes go.
//!
//! Sinks are shared by every worker, so implementations must be safe for
//! concurrent use. The queue-backed sink lives in `repostream-sqs`.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::DeliveryError;
use crate::retry::RetryPolicy;

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Hand one JSON document to the downstream system.
    async fn deliver(&self, message: &str) -> Result<(), DeliveryError>;
}

// ─── Stdout ───────────────────────────────────────────────────────────────────

/// Writes one envelope per line to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink {
    lock: tokio::sync::Mutex<()>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliverySink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn deliver(&self, message: &str) -> Result<(), DeliveryError> {
        // Serialize writers so lines from concurrent workers never interleave.
        let _guard = self.lock.lock().await;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(message.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

// ─── In-memory (for tests) ────────────────────────────────────────────────────

/// Collects messages in memory. Can be told to fail.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
    fail_with: Mutex<Option<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delivery fail with `reason` (`None` to recover).
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.fail_with.lock().unwrap_or_else(|e| e.into_inner()) = reason.map(str::to_string);
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Delivered messages parsed back into JSON values.
    pub fn json(&self) -> Vec<serde_json::Value> {
        self.messages()
            .iter()
            .filter_map(|m| serde_json::from_str(m).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeliverySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, message: &str) -> Result<(), DeliveryError> {
        if let Some(reason) = self.fail_with.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(DeliveryError::Unavailable {
                sink: "memory".into(),
                reason,
            });
        }
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
        Ok(())
    }
}

// ─── Retry wrapper ────────────────────────────────────────────────────────────

/// Retries retryable delivery failures of an inner sink with backoff.
pub struct RetryingSink<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: DeliverySink> RetryingSink<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: DeliverySink> DeliverySink for RetryingSink<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn deliver(&self, message: &str) -> Result<(), DeliveryError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.deliver(message).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    let Some(delay) = self.policy.next_delay(attempt) else {
                        return Err(err);
                    };
                    warn!(sink = self.name(), attempt, ?delay, error = %err, "delivery failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
