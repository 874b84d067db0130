//! Decoding of `subscribeRepos` binary frames.
//!
//! Every websocket message is two concatenated DAG-CBOR items: a header
//! `{op, t}` and a body. `op = 1` carries a message whose type is named by
//! `t`; `op = -1` is an error frame `{error, message}` after which the relay
//! closes the connection.

use bytes::Bytes;
use minicbor::Decoder;

use repostream_core::cbor::{array_len, map_len, optional_link, optional_str};
use repostream_core::event::{Action, CommitEvent, RepoOp};

use crate::error::FrameError;

/// A decoded frame.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Commit(CommitEvent),
    /// Informational message from the relay, e.g. `OutdatedCursor`.
    Info { name: String, message: Option<String> },
    /// Any other message type (`#identity`, `#account`, `#sync`, ...).
    /// Only its sequence number matters here.
    Other { kind: String, seq: Option<i64> },
    /// The relay is about to drop the connection.
    Error { error: String, message: String },
}

/// Decode one binary websocket message.
///
/// The commit's `blocks` are a zero-copy slice of `data`.
pub fn decode_frame(data: &Bytes) -> Result<StreamMessage, FrameError> {
    let mut dec = Decoder::new(data.as_ref());

    let len = map_len(&mut dec)?;
    let mut op = None;
    let mut kind = None;
    for _ in 0..len {
        match dec.str()? {
            "op" => op = Some(dec.i64()?),
            "t" => kind = Some(dec.str()?.to_string()),
            _ => dec.skip()?,
        }
    }

    match op {
        Some(-1) => decode_error(&mut dec),
        Some(1) => match kind.as_deref() {
            Some("#commit") => decode_commit(data, &mut dec).map(StreamMessage::Commit),
            Some("#info") => decode_info(&mut dec),
            Some(other) => Ok(StreamMessage::Other {
                kind: other.to_string(),
                seq: read_seq(&mut dec)?,
            }),
            None => Err(FrameError::Header {
                reason: "message frame without `t`".into(),
            }),
        },
        Some(other) => Err(FrameError::Header {
            reason: format!("unknown op {other}"),
        }),
        None => Err(FrameError::Header {
            reason: "missing `op`".into(),
        }),
    }
}

fn missing(kind: &str, field: &'static str) -> FrameError {
    FrameError::MissingField {
        kind: kind.to_string(),
        field,
    }
}

fn decode_commit(data: &Bytes, dec: &mut Decoder<'_>) -> Result<CommitEvent, FrameError> {
    let len = map_len(dec)?;
    let mut seq = None;
    let mut repo = None;
    let mut rev = None;
    let mut time = None;
    let mut too_big = false;
    let mut ops = Vec::new();
    let mut blocks = Bytes::new();

    for _ in 0..len {
        match dec.str()? {
            "seq" => seq = Some(dec.i64()?),
            "repo" => repo = Some(dec.str()?.to_string()),
            "rev" => rev = Some(dec.str()?.to_string()),
            "time" => time = Some(dec.str()?.to_string()),
            "tooBig" => too_big = dec.bool()?,
            "blocks" => {
                let slice = dec.bytes()?;
                let end = dec.position();
                blocks = data.slice(end - slice.len()..end);
            }
            "ops" => {
                let count = array_len(dec)?;
                ops = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    ops.push(decode_op(dec)?);
                }
            }
            _ => dec.skip()?,
        }
    }

    Ok(CommitEvent {
        seq: seq.ok_or_else(|| missing("#commit", "seq"))?,
        repo: repo.ok_or_else(|| missing("#commit", "repo"))?,
        rev: rev.ok_or_else(|| missing("#commit", "rev"))?,
        time: time.unwrap_or_default(),
        too_big,
        ops,
        blocks,
    })
}

fn decode_op(dec: &mut Decoder<'_>) -> Result<RepoOp, FrameError> {
    let len = map_len(dec)?;
    let mut action = None;
    let mut path = None;
    let mut cid = None;
    for _ in 0..len {
        match dec.str()? {
            "action" => action = Some(Action::from(dec.str()?)),
            "path" => path = Some(dec.str()?.to_string()),
            "cid" => cid = optional_link::<FrameError>(dec)?,
            _ => dec.skip()?,
        }
    }
    Ok(RepoOp {
        action: action.ok_or_else(|| missing("repoOp", "action"))?,
        path: path.ok_or_else(|| missing("repoOp", "path"))?,
        cid,
    })
}

fn decode_info(dec: &mut Decoder<'_>) -> Result<StreamMessage, FrameError> {
    let len = map_len(dec)?;
    let mut name = None;
    let mut message = None;
    for _ in 0..len {
        match dec.str()? {
            "name" => name = Some(dec.str()?.to_string()),
            "message" => message = optional_str(dec)?.map(str::to_string),
            _ => dec.skip()?,
        }
    }
    Ok(StreamMessage::Info {
        name: name.ok_or_else(|| missing("#info", "name"))?,
        message,
    })
}

fn decode_error(dec: &mut Decoder<'_>) -> Result<StreamMessage, FrameError> {
    let len = map_len(dec)?;
    let mut error = None;
    let mut message = None;
    for _ in 0..len {
        match dec.str()? {
            "error" => error = Some(dec.str()?.to_string()),
            "message" => message = optional_str(dec)?.map(str::to_string),
            _ => dec.skip()?,
        }
    }
    Ok(StreamMessage::Error {
        error: error.ok_or_else(|| missing("error", "error"))?,
        message: message.unwrap_or_default(),
    })
}

fn read_seq(dec: &mut Decoder<'_>) -> Result<Option<i64>, FrameError> {
    let len = map_len(dec)?;
    let mut seq = None;
    for _ in 0..len {
        match dec.str()? {
            "seq" => seq = Some(dec.i64()?),
            _ => dec.skip()?,
        }
    }
    Ok(seq)
}
