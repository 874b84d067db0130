//! Content identifiers (CIDv1) as used by atproto repositories.
//!
//! Only the subset the firehose actually carries is supported: CIDv1 with a
//! multihash digest. CIDv0 is rejected. CIDs are created for verification
//! with sha2-256 only, which is the single hash atproto repositories use.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::CidError;

/// Multicodec code for DAG-CBOR blocks.
pub const DAG_CBOR: u64 = 0x71;
/// Multicodec code for raw blocks (blobs).
pub const RAW: u64 = 0x55;
/// Multihash code for sha2-256.
pub const SHA2_256: u64 = 0x12;

/// CBOR tag used by DAG-CBOR for CID links.
pub const LINK_TAG: u64 = 42;

/// A version-1 content identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid {
    codec: u64,
    hash_code: u64,
    digest: Vec<u8>,
}

impl Cid {
    pub fn new(codec: u64, hash_code: u64, digest: impl Into<Vec<u8>>) -> Self {
        Self {
            codec,
            hash_code,
            digest: digest.into(),
        }
    }

    /// Compute the sha2-256 CID of `data` under the given codec.
    pub fn sha256(codec: u64, data: &[u8]) -> Self {
        Self::new(codec, SHA2_256, Sha256::digest(data).to_vec())
    }

    /// Shorthand for a DAG-CBOR block CID.
    pub fn dag_cbor(data: &[u8]) -> Self {
        Self::sha256(DAG_CBOR, data)
    }

    pub fn codec(&self) -> u64 {
        self.codec
    }

    pub fn hash_code(&self) -> u64 {
        self.hash_code
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Recompute this CID's digest over `data`, keeping codec and hash.
    ///
    /// Returns `None` when the multihash is not one we can compute.
    pub fn recompute(&self, data: &[u8]) -> Option<Cid> {
        (self.hash_code == SHA2_256).then(|| Self::sha256(self.codec, data))
    }

    /// Parse a binary CID from the front of `input`.
    /// Returns the CID and the number of bytes consumed.
    pub fn read_bytes(input: &[u8]) -> Result<(Cid, usize), CidError> {
        let mut pos = 0usize;
        if input.len() >= 2 && input[0] == 0x12 && input[1] == 0x20 {
            return Err(CidError::UnsupportedVersion { version: 0 });
        }
        let version = read_varint(input, &mut pos)?;
        if version != 1 {
            return Err(CidError::UnsupportedVersion { version });
        }
        let codec = read_varint(input, &mut pos)?;
        let hash_code = read_varint(input, &mut pos)?;
        let len = read_varint(input, &mut pos)?;
        let end = usize::try_from(len)
            .ok()
            .and_then(|l| pos.checked_add(l))
            .filter(|end| *end <= input.len())
            .ok_or(CidError::DigestLength { len })?;
        let digest = input[pos..end].to_vec();
        Ok((Cid::new(codec, hash_code, digest), end))
    }

    /// Parse the payload of a DAG-CBOR tag-42 link (`0x00 ‖ cid`).
    pub fn from_link_bytes(bytes: &[u8]) -> Result<Cid, CidError> {
        match bytes.split_first() {
            Some((0x00, rest)) => Cid::read_bytes(rest).map(|(cid, _)| cid),
            Some(_) => Err(CidError::MissingLinkPrefix),
            None => Err(CidError::Truncated),
        }
    }

    /// Binary encoding: `varint(1) ‖ varint(codec) ‖ varint(hash) ‖ varint(len) ‖ digest`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.digest.len() + 8);
        write_varint(&mut out, 1);
        write_varint(&mut out, self.codec);
        write_varint(&mut out, self.hash_code);
        write_varint(&mut out, self.digest.len() as u64);
        out.extend_from_slice(&self.digest);
        out
    }

    /// Payload for a DAG-CBOR tag-42 link.
    pub fn to_link_bytes(&self) -> Vec<u8> {
        let mut out = vec![0x00];
        out.extend_from_slice(&self.to_bytes());
        out
    }
}

impl fmt::Display for Cid {
    /// Multibase base32-lower, e.g. `bafyrei…`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", base32_lower(&self.to_bytes()))
    }
}

/// Read an unsigned LEB128 varint. At most 9 bytes (63 bits) as multiformats
/// requires.
pub(crate) fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64, CidError> {
    let mut shift: u32 = 0;
    let mut result: u64 = 0;

    for _ in 0..9 {
        let Some(&b) = data.get(*pos) else {
            return Err(CidError::Truncated);
        };
        *pos += 1;

        result |= ((b & 0x7f) as u64) << shift;
        if (b & 0x80) == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(CidError::VarintOverflow)
}

pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// RFC 4648 base32, lowercase, no padding.
fn base32_lower(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}
