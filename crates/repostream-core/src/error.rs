//! Error types for the commit processing pipeline.
//!
//! The variants are grouped by blast radius: an [`ArchiveError`] or
//! [`PathError`] drops the whole commit event, a [`RecordError`] skips one
//! operation, and a [`DeliveryError`] leaves the pipeline entirely.

use thiserror::Error;

/// Errors while loading a commit's CAR archive. Fatal to the one event.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive truncated while reading {what}")]
    Truncated { what: &'static str },

    #[error("varint overflow at offset {offset}")]
    VarintOverflow { offset: usize },

    #[error("invalid CAR header: {reason}")]
    InvalidHeader { reason: String },

    #[error("CAR has no root CID")]
    MissingRoot,

    #[error("commit block {cid} not present in archive")]
    MissingCommit { cid: String },

    #[error("invalid commit block: {reason}")]
    InvalidCommit { reason: String },

    #[error(transparent)]
    Cid(#[from] CidError),

    #[error("CBOR error: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

/// Errors while parsing a binary CID.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CidError {
    #[error("CID truncated")]
    Truncated,

    #[error("varint overflow in CID")]
    VarintOverflow,

    #[error("unsupported CID version {version}")]
    UnsupportedVersion { version: u64 },

    #[error("CID link is missing the identity multibase prefix")]
    MissingLinkPrefix,

    #[error("digest length {len} exceeds remaining input")]
    DigestLength { len: u64 },
}

/// A repository path that does not match `<nsid>/<rkey>`. Fatal to the event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("expected exactly one '/' in repo path {path:?}")]
    Shape { path: String },

    #[error("invalid collection NSID {nsid:?}: {reason}")]
    Nsid { nsid: String, reason: &'static str },

    #[error("invalid record key {rkey:?}: {reason}")]
    RecordKey { rkey: String, reason: &'static str },
}

/// Per-operation failures. The operation is skipped; the event continues.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record {key} not found in commit blocks")]
    NotFound { key: String },

    #[error("block {cid} referenced by the repo tree is missing")]
    MissingBlock { cid: String },

    #[error("block stored under {expected} hashes to {actual}")]
    CorruptBlock { expected: String, actual: String },

    #[error("operation declares no CID, resolved record is {actual}")]
    MissingDeclaredCid { actual: String },

    #[error("CID mismatch: operation declares {declared}, record block is {actual}")]
    HashMismatch { declared: String, actual: String },

    #[error("invalid MST node {cid}: {reason}")]
    InvalidNode { cid: String, reason: String },

    #[error("malformed record: {reason}")]
    Malformed { reason: String },

    #[error(transparent)]
    Cid(#[from] CidError),

    #[error("CBOR error: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

impl RecordError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Failure to hand an envelope to the downstream queue.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sink '{sink}' rejected message: {reason}")]
    Rejected { sink: String, reason: String },

    #[error("sink '{sink}' unavailable: {reason}")]
    Unavailable { sink: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("envelope serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Returns `true` if a later attempt at the same message may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Io(_))
    }
}
