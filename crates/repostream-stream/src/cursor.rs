//! Resume cursor: which sequence number is safe to restart from.
//!
//! Events complete out of order across repositories, so the cursor cannot
//! simply follow the last completed event. `CursorTracker` keeps the set of
//! dispatched-but-unfinished sequence numbers; everything strictly below the
//! smallest of them is done.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CursorStoreError;

#[derive(Debug, Default)]
pub struct CursorTracker {
    in_flight: BTreeSet<i64>,
    highest_seen: Option<i64>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A commit event with this seq has been dispatched.
    pub fn begin(&mut self, seq: i64) {
        self.in_flight.insert(seq);
        self.observe(seq);
    }

    /// The event with this seq is finished (delivered, dropped or skipped).
    pub fn complete(&mut self, seq: i64) {
        self.in_flight.remove(&seq);
    }

    /// A sequence number was seen that needs no processing.
    pub fn observe(&mut self, seq: i64) {
        self.highest_seen = Some(self.highest_seen.map_or(seq, |h| h.max(seq)));
    }

    pub fn highest_seen(&self) -> Option<i64> {
        self.highest_seen
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Highest seq such that it and everything before it are finished.
    pub fn safe_cursor(&self) -> Option<i64> {
        match self.in_flight.first() {
            Some(&oldest) => Some(oldest - 1),
            None => self.highest_seen,
        }
    }
}

/// Persisted resume position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub cursor: i64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self) -> Result<Option<CursorRecord>, CursorStoreError>;

    async fn save(&self, cursor: i64) -> Result<(), CursorStoreError>;
}

// ─── File store ───────────────────────────────────────────────────────────────

/// Keeps the cursor in a small JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<CursorRecord>, CursorStoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, cursor: i64) -> Result<(), CursorStoreError> {
        let record = CursorRecord {
            cursor,
            updated_at: Utc::now(),
        };
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&record)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(cursor, path = %self.path.display(), "cursor saved");
        Ok(())
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    record: Mutex<Option<CursorRecord>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Option<i64> {
        self.record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|r| r.cursor)
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<CursorRecord>, CursorStoreError> {
        Ok(self.record.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn save(&self, cursor: i64) -> Result<(), CursorStoreError> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = Some(CursorRecord {
            cursor,
            updated_at: Utc::now(),
        });
        Ok(())
    }
}
