//! Commit events as received from the firehose.

use std::fmt;

use bytes::Bytes;

use crate::cid::Cid;

/// One `#commit` message from the repo event stream.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    /// Stream sequence number; also the resume cursor.
    pub seq: i64,
    /// DID of the repository that committed.
    pub repo: String,
    /// Revision (TID) of this commit.
    pub rev: String,
    /// Commit time as sent by the relay (RFC 3339).
    pub time: String,
    /// Set when the relay omitted the blocks because the diff was too large.
    pub too_big: bool,
    pub ops: Vec<RepoOp>,
    /// CAR v1 archive with the blocks the ops refer to.
    pub blocks: Bytes,
}

impl CommitEvent {
    /// Returns `true` if any operation path contains `needle`.
    pub fn touches(&self, needle: &str) -> bool {
        self.ops.iter().any(|op| op.path.contains(needle))
    }
}

/// A single record mutation declared by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOp {
    pub action: Action,
    /// `<collection>/<rkey>`
    pub path: String,
    /// CID of the new record; `None` for deletes.
    pub cid: Option<Cid>,
}

/// Operation kind. Unknown kinds are carried through rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Update,
    Delete,
    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        match s {
            "create" => Self::Create,
            "update" => Self::Update,
            "delete" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
