//! Archive and record decoding capabilities.
//!
//! The commit processor only talks to these traits, so the binary formats
//! can be swapped out (or faked in tests) without touching the pipeline.
//! The shipped implementations are [`CarArchiveDecoder`] and
//! [`DagCborDecoder`].

use bytes::Bytes;
use minicbor::Decoder;
use serde_json::Value;

use crate::car::{read_car, BlockSet};
use crate::cbor;
use crate::cid::Cid;
use crate::error::{ArchiveError, RecordError};
use crate::mst;
use crate::path::{Nsid, RecordKey};
use crate::record::decode_dag_cbor;

/// Record bytes together with the CID recomputed from those bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecord {
    pub cid: Cid,
    pub bytes: Bytes,
}

/// The decoded contents of one commit's block archive.
pub trait RepoArchive: Send + Sync {
    /// Resolve the record at `collection/rkey`.
    ///
    /// The returned CID must be computed from the returned bytes, not copied
    /// from a link, so callers can compare it against a declared CID.
    fn get_record(&self, collection: &Nsid, rkey: &RecordKey) -> Result<ResolvedRecord, RecordError>;

    /// Number of blocks carried by the archive.
    fn block_count(&self) -> usize;
}

/// Decodes a commit event's binary archive.
pub trait ArchiveDecoder: Send + Sync {
    fn decode_archive(&self, blocks: &Bytes) -> Result<Box<dyn RepoArchive>, ArchiveError>;
}

/// Decodes verified record bytes into a schema-agnostic value.
pub trait RecordDecoder: Send + Sync {
    fn decode_record(&self, bytes: &[u8]) -> Result<Value, RecordError>;
}

// ─── DAG-CBOR records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct DagCborDecoder;

impl RecordDecoder for DagCborDecoder {
    fn decode_record(&self, bytes: &[u8]) -> Result<Value, RecordError> {
        decode_dag_cbor(bytes)
    }
}

// ─── CAR archives ─────────────────────────────────────────────────────────────

/// The signed commit object at the root of a repo diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub did: String,
    pub version: u64,
    /// Root of the record tree.
    pub data: Cid,
    pub rev: String,
    pub prev: Option<Cid>,
}

impl Commit {
    pub fn decode(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let invalid = |reason: &str| ArchiveError::InvalidCommit {
            reason: reason.to_string(),
        };

        let mut dec = Decoder::new(bytes);
        let len = cbor::map_len(&mut dec)?;
        let mut did = None;
        let mut version = None;
        let mut data = None;
        let mut rev = None;
        let mut prev = None;
        for _ in 0..len {
            match dec.str()? {
                "did" => did = Some(dec.str()?.to_owned()),
                "version" => version = Some(dec.u64()?),
                "data" => data = Some(cbor::link::<ArchiveError>(&mut dec)?),
                "rev" => rev = Some(dec.str()?.to_owned()),
                "prev" => prev = cbor::optional_link::<ArchiveError>(&mut dec)?,
                _ => dec.skip()?,
            }
        }

        Ok(Self {
            did: did.ok_or_else(|| invalid("missing did"))?,
            version: version.ok_or_else(|| invalid("missing version"))?,
            data: data.ok_or_else(|| invalid("missing data"))?,
            rev: rev.ok_or_else(|| invalid("missing rev"))?,
            prev,
        })
    }
}

/// A commit diff loaded from a CAR archive.
#[derive(Debug, Clone)]
pub struct CarRepo {
    pub commit: Commit,
    pub blocks: BlockSet,
}

impl CarRepo {
    pub fn load(data: &Bytes) -> Result<Self, ArchiveError> {
        let archive = read_car(data)?;
        let root = archive.root().ok_or(ArchiveError::MissingRoot)?;
        let commit_bytes = archive
            .blocks
            .get(root)
            .ok_or_else(|| ArchiveError::MissingCommit {
                cid: root.to_string(),
            })?;
        let commit = Commit::decode(commit_bytes)?;
        Ok(Self {
            commit,
            blocks: archive.blocks,
        })
    }
}

impl RepoArchive for CarRepo {
    fn get_record(&self, collection: &Nsid, rkey: &RecordKey) -> Result<ResolvedRecord, RecordError> {
        let key = format!("{collection}/{rkey}");
        let leaf = mst::lookup(&self.blocks, &self.commit.data, &key)?;
        let bytes = self
            .blocks
            .get(&leaf)
            .ok_or_else(|| RecordError::MissingBlock {
                cid: leaf.to_string(),
            })?
            .clone();
        let actual = leaf.recompute(&bytes).ok_or_else(|| {
            RecordError::malformed(format!("unsupported multihash 0x{:x}", leaf.hash_code()))
        })?;
        if actual != leaf {
            return Err(RecordError::CorruptBlock {
                expected: leaf.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(ResolvedRecord { cid: actual, bytes })
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CarArchiveDecoder;

impl ArchiveDecoder for CarArchiveDecoder {
    fn decode_archive(&self, blocks: &Bytes) -> Result<Box<dyn RepoArchive>, ArchiveError> {
        Ok(Box::new(CarRepo::load(blocks)?))
    }
}
