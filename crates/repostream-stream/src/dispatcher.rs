//! Keyed dispatch of commit events to per-repository workers.
//!
//! ```text
//!                        ┌──────────────────────────┐
//!                   ┌──► │ did:plc:aaa  [e1, e4]    │ ──► worker (1 permit)
//!  engine ──────────┤    └──────────────────────────┘
//!  (arrival order)  │    ┌──────────────────────────┐
//!                   └──► │ did:plc:bbb  [e2]        │ ──► worker (1 permit)
//!                        └──────────────────────────┘
//! ```
//!
//! A repository with queued events has exactly one worker, which drains its
//! queue in FIFO order and exits when the queue is empty. Workers hold a
//! semaphore permit, so at most `max_concurrency` repositories are processed
//! at once and `dispatch` blocks (backpressure on the reader) when every
//! permit is taken.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use repostream_core::error::DeliveryError;
use repostream_core::event::CommitEvent;
use repostream_core::handler::CommitHandler;

use crate::config::DeliveryFailurePolicy;
use crate::cursor::CursorTracker;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatcher halted after a fatal delivery failure")]
    Halted,
}

/// Reported to the engine when delivery fails under `DeliveryFailurePolicy::Abort`.
#[derive(Debug)]
pub struct DispatchFailure {
    pub repo: String,
    pub seq: i64,
    pub error: DeliveryError,
}

#[derive(Debug, Default)]
struct DispatchMetrics {
    dispatched: AtomicU64,
    completed: AtomicU64,
    delivery_failures: AtomicU64,
    panics: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub completed: u64,
    pub delivery_failures: u64,
    pub panics: u64,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
}

struct Shared {
    handler: Arc<dyn CommitHandler>,
    policy: DeliveryFailurePolicy,
    permits: Arc<Semaphore>,
    max_concurrency: u32,
    queues: Mutex<HashMap<String, VecDeque<CommitEvent>>>,
    cursor: Mutex<CursorTracker>,
    failures: mpsc::UnboundedSender<DispatchFailure>,
    halt: CancellationToken,
    metrics: DispatchMetrics,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Dispatcher {
    /// Create a dispatcher and the channel on which fatal delivery failures
    /// are reported.
    pub fn new(
        handler: Arc<dyn CommitHandler>,
        max_concurrency: u32,
        policy: DeliveryFailurePolicy,
    ) -> (Self, mpsc::UnboundedReceiver<DispatchFailure>) {
        let max_concurrency = max_concurrency.max(1);
        let (failures, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            handler,
            policy,
            permits: Arc::new(Semaphore::new(max_concurrency as usize)),
            max_concurrency,
            queues: Mutex::new(HashMap::new()),
            cursor: Mutex::new(CursorTracker::new()),
            failures,
            halt: CancellationToken::new(),
            metrics: DispatchMetrics::default(),
        };
        (Self { shared: Arc::new(shared) }, rx)
    }

    /// Queue an event behind earlier events of the same repository.
    ///
    /// Waits for a worker permit when the repository has no worker yet.
    pub async fn dispatch(&self, event: CommitEvent) -> Result<(), DispatchError> {
        let shared = &self.shared;
        if shared.halt.is_cancelled() {
            return Err(DispatchError::Halted);
        }

        let repo = event.repo.clone();
        let seq = event.seq;
        lock(&shared.cursor).begin(seq);
        shared.metrics.dispatched.fetch_add(1, Ordering::Relaxed);

        let needs_worker = match lock(&shared.queues).entry(repo.clone()) {
            Entry::Occupied(mut queue) => {
                queue.get_mut().push_back(event);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::from([event]));
                true
            }
        };
        if !needs_worker {
            trace!(%repo, seq, "queued behind in-flight event");
            return Ok(());
        }

        let permit = Arc::clone(&shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Halted)?;
        if shared.halt.is_cancelled() {
            return Err(DispatchError::Halted);
        }

        let worker = Arc::clone(shared);
        tokio::spawn(async move {
            worker.run_worker(repo, permit).await;
        });
        Ok(())
    }

    /// Record a sequence number that needs no processing.
    pub fn observe(&self, seq: i64) {
        lock(&self.shared.cursor).observe(seq);
    }

    /// Stop starting new events; workers exit after their current one.
    pub fn halt(&self) {
        self.shared.halt.cancel();
    }

    pub fn is_halted(&self) -> bool {
        self.shared.halt.is_cancelled()
    }

    /// Wait until no worker is running.
    pub async fn drain(&self) {
        let n = self.shared.max_concurrency;
        if let Ok(all) = self.shared.permits.acquire_many(n).await {
            drop(all);
        }
    }

    /// Cursor from which a restart loses nothing.
    pub fn safe_cursor(&self) -> Option<i64> {
        lock(&self.shared.cursor).safe_cursor()
    }

    /// Highest sequence number handed to the dispatcher.
    pub fn last_seq(&self) -> Option<i64> {
        lock(&self.shared.cursor).highest_seen()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.shared.cursor).in_flight()
    }

    /// Repositories with queued or running events.
    pub fn active_repos(&self) -> usize {
        lock(&self.shared.queues).len()
    }

    pub fn stats(&self) -> DispatchStats {
        let m = &self.shared.metrics;
        DispatchStats {
            dispatched: m.dispatched.load(Ordering::Relaxed),
            completed: m.completed.load(Ordering::Relaxed),
            delivery_failures: m.delivery_failures.load(Ordering::Relaxed),
            panics: m.panics.load(Ordering::Relaxed),
        }
    }
}

impl Shared {
    async fn run_worker(self: Arc<Self>, repo: String, _permit: OwnedSemaphorePermit) {
        debug!(%repo, "worker started");
        loop {
            if self.halt.is_cancelled() {
                // Abandoned events stay in flight so the cursor never passes them.
                lock(&self.queues).remove(&repo);
                return;
            }

            let event = {
                let mut queues = lock(&self.queues);
                match queues.get_mut(&repo).and_then(VecDeque::pop_front) {
                    Some(event) => event,
                    None => {
                        queues.remove(&repo);
                        debug!(%repo, "worker idle, exiting");
                        return;
                    }
                }
            };
            let seq = event.seq;

            let result = AssertUnwindSafe(self.handler.handle_commit(&event))
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(())) => self.complete(seq),
                Ok(Err(err)) => {
                    self.metrics.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    match self.policy {
                        DeliveryFailurePolicy::Skip => {
                            error!(%repo, seq, error = %err, "delivery failed, skipping event");
                            self.complete(seq);
                        }
                        DeliveryFailurePolicy::Abort => {
                            error!(%repo, seq, error = %err, "delivery failed, halting dispatch");
                            self.halt.cancel();
                            let _ = self.failures.send(DispatchFailure {
                                repo: repo.clone(),
                                seq,
                                error: err,
                            });
                            lock(&self.queues).remove(&repo);
                            return;
                        }
                    }
                }
                Err(_) => {
                    self.metrics.panics.fetch_add(1, Ordering::Relaxed);
                    error!(%repo, seq, "commit handler panicked, dropping event");
                    self.complete(seq);
                }
            }
        }
    }

    fn complete(&self, seq: i64) {
        lock(&self.cursor).complete(seq);
        self.metrics.completed.fetch_add(1, Ordering::Relaxed);
    }
}
