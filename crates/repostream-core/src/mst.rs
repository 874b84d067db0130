//! Merkle Search Tree lookup over an event's block set.
//!
//! Node layout (DAG-CBOR):
//! ```text
//! { l: link | null,                      // subtree with keys < e[0]
//!   e: [ { p: uint,                      // bytes shared with previous key
//!          k: bytes,                     // remaining key suffix
//!          v: link,                      // record CID
//!          t: link | null } ] }          // subtree with keys between this entry and the next
//! ```
//!
//! A commit diff only carries the nodes along changed paths, so a missing
//! node is reported as [`RecordError::MissingBlock`], not as corruption.

use std::cmp::Ordering;

use minicbor::Decoder;

use crate::car::BlockSet;
use crate::cbor;
use crate::cid::Cid;
use crate::error::RecordError;

/// Bound on descent depth; real trees are a handful of levels deep.
const MAX_TREE_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub prefix_len: usize,
    pub key_suffix: Vec<u8>,
    pub value: Cid,
    pub tree: Option<Cid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub left: Option<Cid>,
    pub entries: Vec<TreeEntry>,
}

impl TreeNode {
    pub fn decode(cid: &Cid, bytes: &[u8]) -> Result<Self, RecordError> {
        let invalid = |reason: &str| RecordError::InvalidNode {
            cid: cid.to_string(),
            reason: reason.to_string(),
        };

        let mut dec = Decoder::new(bytes);
        let len = cbor::map_len(&mut dec)?;
        let mut left = None;
        let mut entries = None;
        for _ in 0..len {
            match dec.str()? {
                "l" => left = cbor::optional_link::<RecordError>(&mut dec)?,
                "e" => {
                    let count = cbor::array_len(&mut dec)?;
                    let mut list = Vec::new();
                    for _ in 0..count {
                        list.push(decode_entry(&mut dec).map_err(|e| match e {
                            RecordError::Malformed { reason } => invalid(&reason),
                            other => other,
                        })?);
                    }
                    entries = Some(list);
                }
                _ => dec.skip()?,
            }
        }

        Ok(Self {
            left,
            entries: entries.ok_or_else(|| invalid("missing entry list"))?,
        })
    }
}

fn decode_entry(dec: &mut Decoder<'_>) -> Result<TreeEntry, RecordError> {
    let len = cbor::map_len(dec)?;
    let mut prefix_len = None;
    let mut key_suffix = None;
    let mut value = None;
    let mut tree = None;
    for _ in 0..len {
        match dec.str()? {
            "p" => prefix_len = Some(dec.u64()?),
            "k" => key_suffix = Some(dec.bytes()?.to_vec()),
            "v" => value = Some(cbor::link::<RecordError>(dec)?),
            "t" => tree = cbor::optional_link::<RecordError>(dec)?,
            _ => dec.skip()?,
        }
    }

    let prefix_len = prefix_len.ok_or_else(|| RecordError::malformed("entry missing 'p'"))?;
    Ok(TreeEntry {
        prefix_len: usize::try_from(prefix_len)
            .map_err(|_| RecordError::malformed("prefix length overflow"))?,
        key_suffix: key_suffix.ok_or_else(|| RecordError::malformed("entry missing 'k'"))?,
        value: value.ok_or_else(|| RecordError::malformed("entry missing 'v'"))?,
        tree,
    })
}

/// Find the record CID stored under `key` in the tree rooted at `root`.
pub fn lookup(blocks: &BlockSet, root: &Cid, key: &str) -> Result<Cid, RecordError> {
    let key = key.as_bytes();
    let mut current = root.clone();

    for _ in 0..MAX_TREE_DEPTH {
        let bytes = blocks.get(&current).ok_or_else(|| RecordError::MissingBlock {
            cid: current.to_string(),
        })?;
        let node = TreeNode::decode(&current, bytes)?;

        let mut descend = node.left;
        let mut prev_key: Vec<u8> = Vec::new();
        for entry in node.entries {
            if entry.prefix_len > prev_key.len() {
                return Err(RecordError::InvalidNode {
                    cid: current.to_string(),
                    reason: "prefix longer than previous key".into(),
                });
            }
            let mut full = prev_key[..entry.prefix_len].to_vec();
            full.extend_from_slice(&entry.key_suffix);

            match key.cmp(full.as_slice()) {
                Ordering::Equal => return Ok(entry.value),
                Ordering::Less => break,
                Ordering::Greater => {
                    descend = entry.tree;
                    prev_key = full;
                }
            }
        }

        match descend {
            Some(next) => current = next,
            None => {
                return Err(RecordError::NotFound {
                    key: String::from_utf8_lossy(key).into_owned(),
                })
            }
        }
    }

    Err(RecordError::InvalidNode {
        cid: root.to_string(),
        reason: "tree exceeds maximum depth".into(),
    })
}
