//! Repository path parsing: `<collection NSID>/<record key>`.

use std::fmt;

use crate::error::PathError;

const NSID_MAX_LEN: usize = 317;
const SEGMENT_MAX_LEN: usize = 63;
const RKEY_MAX_LEN: usize = 512;

/// A namespaced collection identifier, e.g. `app.bsky.feed.post`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nsid(String);

impl Nsid {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let err = |reason| PathError::Nsid {
            nsid: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(err("empty"));
        }
        if raw.len() > NSID_MAX_LEN {
            return Err(err("too long"));
        }
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() < 3 {
            return Err(err("needs at least three segments"));
        }

        let (name, domain) = segments.split_last().ok_or_else(|| err("empty"))?;
        for (i, segment) in domain.iter().enumerate() {
            if segment.is_empty() || segment.len() > SEGMENT_MAX_LEN {
                return Err(err("domain segment length out of range"));
            }
            if !segment.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                return Err(err("domain segment has invalid characters"));
            }
            if segment.starts_with('-') || segment.ends_with('-') {
                return Err(err("domain segment starts or ends with '-'"));
            }
            if i == 0 && segment.as_bytes()[0].is_ascii_digit() {
                return Err(err("first segment starts with a digit"));
            }
        }

        if name.is_empty() || name.len() > SEGMENT_MAX_LEN {
            return Err(err("name segment length out of range"));
        }
        if !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(err("name segment must be alphanumeric"));
        }
        if name.as_bytes()[0].is_ascii_digit() {
            return Err(err("name segment starts with a digit"));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque record key within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let err = |reason| PathError::RecordKey {
            rkey: raw.to_string(),
            reason,
        };

        if raw.is_empty() || raw.len() > RKEY_MAX_LEN {
            return Err(err("length out of range"));
        }
        if raw == "." || raw == ".." {
            return Err(err("reserved key"));
        }
        let valid = raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'~' | b'-'));
        if !valid {
            return Err(err("invalid characters"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a repo path into its collection and record key.
pub fn parse_repo_path(path: &str) -> Result<(Nsid, RecordKey), PathError> {
    let mut parts = path.splitn(3, '/');
    let (Some(collection), Some(rkey), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(PathError::Shape {
            path: path.to_string(),
        });
    };
    Ok((Nsid::parse(collection)?, RecordKey::parse(rkey)?))
}
