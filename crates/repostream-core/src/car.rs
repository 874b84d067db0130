//! CAR v1 archive reading.
//!
//! ```text
//! varint(header_len) ‖ header (DAG-CBOR {version: 1, roots: [link]})
//! varint(section_len) ‖ cid ‖ block bytes
//! varint(section_len) ‖ cid ‖ block bytes
//! ...
//! ```
//!
//! Blocks are sliced out of the event's buffer without copying. Block
//! contents are not hashed at load time; integrity is checked per record
//! when it is resolved, so one bad block only costs the operation that
//! needs it.

use std::collections::HashMap;

use bytes::Bytes;
use minicbor::Decoder;

use crate::cbor;
use crate::cid::{read_varint, Cid};
use crate::error::{ArchiveError, CidError};

/// Event-scoped mapping of CID → block bytes.
#[derive(Debug, Clone, Default)]
pub struct BlockSet {
    blocks: HashMap<Cid, Bytes>,
}

impl BlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cid: Cid, data: Bytes) {
        self.blocks.insert(cid, data);
    }

    pub fn get(&self, cid: &Cid) -> Option<&Bytes> {
        self.blocks.get(cid)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A decoded CAR: its root CIDs and all contained blocks.
#[derive(Debug, Clone)]
pub struct CarArchive {
    pub roots: Vec<Cid>,
    pub blocks: BlockSet,
}

impl CarArchive {
    /// The first root, which for a commit diff is the signed commit block.
    pub fn root(&self) -> Option<&Cid> {
        self.roots.first()
    }
}

/// Read a CAR v1 archive from `data`.
pub fn read_car(data: &Bytes) -> Result<CarArchive, ArchiveError> {
    let mut pos = 0usize;

    let header_len = section_varint(data, &mut pos, "header length")?;
    let header_end = section_end(data, pos, header_len, "header")?;
    let roots = decode_header(&data[pos..header_end])?;
    pos = header_end;

    let mut blocks = BlockSet::new();
    while pos < data.len() {
        let section_len = section_varint(data, &mut pos, "section length")?;
        let end = section_end(data, pos, section_len, "section")?;
        let (cid, cid_len) = Cid::read_bytes(&data[pos..end])?;
        blocks.insert(cid, data.slice(pos + cid_len..end));
        pos = end;
    }

    Ok(CarArchive { roots, blocks })
}

fn decode_header(bytes: &[u8]) -> Result<Vec<Cid>, ArchiveError> {
    let invalid = |reason: &str| ArchiveError::InvalidHeader {
        reason: reason.to_string(),
    };

    let mut dec = Decoder::new(bytes);
    let len = cbor::map_len(&mut dec)?;
    let mut version = None;
    let mut roots = None;
    for _ in 0..len {
        match dec.str()? {
            "version" => version = Some(dec.u64()?),
            "roots" => {
                let count = cbor::array_len(&mut dec)?;
                let mut list = Vec::new();
                for _ in 0..count {
                    list.push(cbor::link::<ArchiveError>(&mut dec)?);
                }
                roots = Some(list);
            }
            _ => dec.skip()?,
        }
    }

    match version {
        Some(1) => {}
        Some(_) => return Err(invalid("unsupported CAR version")),
        None => return Err(invalid("missing version")),
    }
    let roots = roots.ok_or_else(|| invalid("missing roots"))?;
    if roots.is_empty() {
        return Err(ArchiveError::MissingRoot);
    }
    Ok(roots)
}

fn section_varint(data: &[u8], pos: &mut usize, what: &'static str) -> Result<u64, ArchiveError> {
    let offset = *pos;
    read_varint(data, pos).map_err(|e| match e {
        CidError::VarintOverflow => ArchiveError::VarintOverflow { offset },
        _ => ArchiveError::Truncated { what },
    })
}

fn section_end(data: &[u8], pos: usize, len: u64, what: &'static str) -> Result<usize, ArchiveError> {
    usize::try_from(len)
        .ok()
        .and_then(|len| pos.checked_add(len))
        .filter(|end| *end <= data.len())
        .ok_or(ArchiveError::Truncated { what })
}
