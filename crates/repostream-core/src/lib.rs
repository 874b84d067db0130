//! repostream-core: turns repository commit events into JSON envelopes.
//!
//! # Architecture
//!
//! ```text
//! CommitEvent → CommitProcessor
//!                   ├── ArchiveDecoder   (CAR v1 → block set + commit + MST)
//!                   ├── parse_repo_path  (<collection NSID>/<record key>)
//!                   ├── CollectionFilter (exact NSID match, empty = all)
//!                   ├── RecordDecoder    (DAG-CBOR → JSON)
//!                   └── DeliverySink     (queue / stdout / memory)
//! ```
//!
//! The stream side (connection, per-repo dispatch, cursor) lives in
//! `repostream-stream`.

pub mod car;
pub mod cbor;
pub mod cid;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod event;
pub mod handler;
pub mod mst;
pub mod path;
pub mod processor;
pub mod record;
pub mod retry;
pub mod sink;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use cid::Cid;
pub use codec::{ArchiveDecoder, CarArchiveDecoder, DagCborDecoder, RecordDecoder, RepoArchive, ResolvedRecord};
pub use envelope::Envelope;
pub use error::{ArchiveError, CidError, DeliveryError, PathError, RecordError};
pub use event::{Action, CommitEvent, RepoOp};
pub use handler::CommitHandler;
pub use path::{parse_repo_path, Nsid, RecordKey};
pub use processor::{CollectionFilter, CommitOutcome, CommitProcessor, DropReason, ProcessorConfig, ProcessorStats};
pub use retry::{RetryConfig, RetryPolicy};
pub use sink::{DeliverySink, MemorySink, RetryingSink, StdoutSink};
