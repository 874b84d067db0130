//! # repostream-stream
//!
//! Subscribes to a relay's repository event stream and feeds commit events
//! through a `CommitHandler` with per-repository ordering.
//!
//! ## Architecture
//! ```text
//! EventSource (websocket reader task)
//!       │ StreamMessage, relay order
//!       ▼
//! StreamEngine ── state: watch::Sender<EngineState>
//!       │
//!       ▼
//! Dispatcher (repo → FIFO queue, Semaphore(max_concurrency))
//!       │
//!       ▼
//! CommitHandler::handle_commit      CursorTracker → CursorStore
//! ```

pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod frame;
pub mod listener;
pub mod ws_listener;

pub use config::{DeliveryFailurePolicy, StreamConfig};
pub use cursor::{CursorRecord, CursorStore, CursorTracker, FileCursorStore, MemoryCursorStore};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use engine::{EngineState, StreamEngine, StreamSummary};
pub use error::{CursorStoreError, FrameError, StreamError};
pub use frame::{decode_frame, StreamMessage};
pub use listener::{EventSource, MessageStream};
pub use ws_listener::FirehoseWsListener;
