//! `StreamEngine`: drives one relay subscription through the dispatcher.
//!
//! ```text
//! Connecting ──► Streaming ──► Draining ──► Stopped
//!      │             │                         ▲
//!      └─────────────┴──────► Failed ──────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use repostream_core::handler::CommitHandler;

use crate::config::StreamConfig;
use crate::cursor::CursorStore;
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::error::StreamError;
use crate::frame::StreamMessage;
use crate::listener::{EventSource, MessageStream};

/// Lifecycle of a run, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Not yet started.
    Idle,
    /// Opening (or reopening) the relay subscription.
    Connecting,
    /// Reading frames and dispatching commits.
    Streaming,
    /// Shutdown requested; finishing queued events.
    Draining,
    /// Unrecoverable transport or delivery failure.
    Failed,
    /// Terminated.
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Draining => write!(f, "draining"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    /// Highest sequence number received.
    pub last_seq: Option<i64>,
    /// Cursor a restart should resume from.
    pub cursor: Option<i64>,
    pub reconnections: u32,
    pub dispatch: DispatchStats,
}

pub struct StreamEngine {
    config: StreamConfig,
    source: Arc<dyn EventSource>,
    handler: Arc<dyn CommitHandler>,
    cursor_store: Option<Arc<dyn CursorStore>>,
    state: watch::Sender<EngineState>,
}

impl StreamEngine {
    pub fn new(config: StreamConfig, source: Arc<dyn EventSource>, handler: Arc<dyn CommitHandler>) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            config,
            source,
            handler,
            cursor_store: None,
            state,
        }
    }

    /// Persist the resume cursor periodically and on exit.
    pub fn with_cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    fn set_state(&self, next: EngineState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "engine state");
        }
    }

    /// Run until `shutdown` is cancelled or the stream fails.
    ///
    /// `start_cursor` of `None` or `Some(0)` subscribes at the live head;
    /// reconnects before any frame arrives do the same.
    ///
    /// Queued events are drained in both cases and the cursor is
    /// checkpointed. After a delivery failure under `Abort` the dispatcher
    /// has already halted, so only events in progress finish.
    pub async fn run(&self, start_cursor: Option<i64>, shutdown: CancellationToken) -> Result<StreamSummary, StreamError> {
        let start_cursor = start_cursor.filter(|c| *c > 0);
        self.set_state(EngineState::Connecting);
        let (dispatcher, mut failures) = Dispatcher::new(
            Arc::clone(&self.handler),
            self.config.max_concurrency,
            self.config.on_delivery_error,
        );

        let mut stream = match self.source.subscribe(start_cursor).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(endpoint = self.source.endpoint(), error = %e, "initial connection failed");
                self.set_state(EngineState::Failed);
                self.set_state(EngineState::Stopped);
                return Err(e);
            }
        };
        self.set_state(EngineState::Streaming);

        let period = Duration::from_secs(self.config.checkpoint_interval_secs.max(1));
        let mut checkpoint = interval_at(Instant::now() + period, period);
        checkpoint.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut reconnections = 0u32;
        let mut attempts = 0u32;

        let outcome: Result<(), StreamError> = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break Ok(()),

                Some(failure) = failures.recv() => {
                    break Err(StreamError::DeliveryFailed {
                        repo: failure.repo,
                        seq: failure.seq,
                        source: failure.error,
                    });
                }

                _ = checkpoint.tick() => {
                    self.checkpoint(&dispatcher).await;
                }

                item = stream.next() => match item {
                    Some(Ok(msg)) => {
                        attempts = 0;
                        if let Err(e) = self.handle_message(&dispatcher, msg).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) if e.is_fatal() => break Err(e),
                    other => {
                        if let Some(Err(e)) = other {
                            warn!(error = %e, "relay connection lost");
                        } else {
                            warn!("relay stream ended");
                        }
                        match self.reconnect(&dispatcher, start_cursor, &mut attempts, &shutdown).await {
                            Ok(Some(next)) => {
                                reconnections += 1;
                                stream = next;
                            }
                            Ok(None) => break Ok(()),
                            Err(e) => break Err(e),
                        }
                    }
                },
            }
        };
        drop(stream);

        let result = match outcome {
            Ok(()) => {
                self.set_state(EngineState::Draining);
                info!(in_flight = dispatcher.in_flight(), repos = dispatcher.active_repos(), "draining");
                dispatcher.drain().await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "stream failed");
                self.set_state(EngineState::Failed);
                dispatcher.drain().await;
                Err(e)
            }
        };

        self.checkpoint(&dispatcher).await;
        let summary = StreamSummary {
            last_seq: dispatcher.last_seq(),
            cursor: dispatcher.safe_cursor(),
            reconnections,
            dispatch: dispatcher.stats(),
        };
        info!(last_seq = ?summary.last_seq, cursor = ?summary.cursor, "stream stopped");
        self.set_state(EngineState::Stopped);
        result.map(|()| summary)
    }

    async fn handle_message(&self, dispatcher: &Dispatcher, msg: StreamMessage) -> Result<(), StreamError> {
        match msg {
            StreamMessage::Commit(evt) => {
                // Halting only happens alongside a reported failure, which the
                // select loop picks up next.
                if dispatcher.dispatch(evt).await.is_err() {
                    debug!("dispatcher halted, commit not dispatched");
                }
            }
            StreamMessage::Info { name, message } => {
                warn!(%name, message = message.as_deref().unwrap_or(""), "relay info message");
            }
            StreamMessage::Other { kind, seq } => {
                debug!(%kind, ?seq, "non-commit message");
                if let Some(seq) = seq {
                    dispatcher.observe(seq);
                }
            }
            StreamMessage::Error { error, message } => {
                return Err(StreamError::Remote { error, message });
            }
        }
        Ok(())
    }

    /// Resubscribe after a lost connection, resuming after the last
    /// received seq. `Ok(None)` means shutdown was requested meanwhile.
    async fn reconnect(
        &self,
        dispatcher: &Dispatcher,
        start_cursor: Option<i64>,
        attempts: &mut u32,
        shutdown: &CancellationToken,
    ) -> Result<Option<MessageStream>, StreamError> {
        self.set_state(EngineState::Connecting);
        loop {
            *attempts += 1;
            if *attempts > self.config.max_reconnects {
                return Err(StreamError::ReconnectsExhausted {
                    attempts: *attempts - 1,
                });
            }
            let delay = self.config.reconnect_delay(*attempts);
            info!(attempt = *attempts, ?delay, "reconnecting to relay");
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }

            let resume = dispatcher.last_seq().or(start_cursor);
            match self.source.subscribe(resume).await {
                Ok(stream) => {
                    info!(cursor = ?resume, "resubscribed");
                    self.set_state(EngineState::Streaming);
                    return Ok(Some(stream));
                }
                Err(e) if e.is_fatal() && !matches!(e, StreamError::ConnectionFailed { .. }) => {
                    return Err(e);
                }
                Err(e) => warn!(attempt = *attempts, error = %e, "reconnect failed"),
            }
        }
    }

    async fn checkpoint(&self, dispatcher: &Dispatcher) {
        let (Some(store), Some(cursor)) = (&self.cursor_store, dispatcher.safe_cursor()) else {
            return;
        };
        if let Err(e) = store.save(cursor).await {
            warn!(cursor, error = %e, "failed to persist cursor");
        }
    }
}
