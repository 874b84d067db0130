//! DAG-CBOR record decoding into generic JSON values.
//!
//! The output follows the atproto JSON data model: CID links become
//! `{"$link": "<cid>"}` and byte strings become `{"$bytes": "<base64>"}`
//! (standard alphabet, unpadded). Everything the data model forbids
//! (floats, undefined, non-text map keys, tags other than 42,
//! indefinite-length items) is rejected rather than approximated.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use minicbor::data::Type;
use minicbor::Decoder;
use serde_json::{json, Map, Value};

use crate::cbor;
use crate::cid::{Cid, LINK_TAG};
use crate::error::RecordError;

/// Maximum container nesting accepted in a record.
pub const MAX_DEPTH: usize = 64;

/// Decode one complete DAG-CBOR value. Trailing bytes are an error.
pub fn decode_dag_cbor(bytes: &[u8]) -> Result<Value, RecordError> {
    let mut dec = Decoder::new(bytes);
    let value = decode_value(&mut dec, 0)?;
    if dec.position() != bytes.len() {
        return Err(RecordError::malformed(format!(
            "{} trailing bytes after record",
            bytes.len() - dec.position()
        )));
    }
    Ok(value)
}

fn decode_value(dec: &mut Decoder<'_>, depth: usize) -> Result<Value, RecordError> {
    if depth > MAX_DEPTH {
        return Err(RecordError::malformed("record nesting too deep"));
    }

    match dec.datatype()? {
        Type::Null => {
            dec.null()?;
            Ok(Value::Null)
        }
        Type::Bool => Ok(Value::Bool(dec.bool()?)),
        Type::U8
        | Type::U16
        | Type::U32
        | Type::U64
        | Type::I8
        | Type::I16
        | Type::I32
        | Type::I64 => {
            let n = dec
                .i64()
                .map_err(|_| RecordError::malformed("integer out of i64 range"))?;
            Ok(Value::from(n))
        }
        Type::Int => Err(RecordError::malformed("integer out of i64 range")),
        Type::String => Ok(Value::String(dec.str()?.to_owned())),
        Type::Bytes => Ok(json!({ "$bytes": STANDARD_NO_PAD.encode(dec.bytes()?) })),
        Type::Array => {
            let len = cbor::array_len(dec)?;
            let mut items = Vec::new();
            for _ in 0..len {
                items.push(decode_value(dec, depth + 1)?);
            }
            Ok(Value::Array(items))
        }
        Type::Map => {
            let len = cbor::map_len(dec)?;
            let mut map = Map::new();
            for _ in 0..len {
                if !matches!(dec.datatype()?, Type::String) {
                    return Err(RecordError::malformed("map keys must be text strings"));
                }
                let key = dec.str()?.to_owned();
                let value = decode_value(dec, depth + 1)?;
                if map.contains_key(&key) {
                    return Err(RecordError::malformed(format!("duplicate map key {key:?}")));
                }
                map.insert(key, value);
            }
            Ok(Value::Object(map))
        }
        Type::Tag => {
            let tag = dec.tag()?;
            if tag.as_u64() != LINK_TAG {
                return Err(RecordError::malformed(format!(
                    "unsupported CBOR tag {}",
                    tag.as_u64()
                )));
            }
            let cid = Cid::from_link_bytes(dec.bytes()?)?;
            Ok(json!({ "$link": cid.to_string() }))
        }
        Type::F16 | Type::F32 | Type::F64 => {
            Err(RecordError::malformed("floats are not allowed in records"))
        }
        Type::ArrayIndef | Type::MapIndef | Type::BytesIndef | Type::StringIndef => Err(
            RecordError::malformed("indefinite-length items are not allowed"),
        ),
        other => Err(RecordError::malformed(format!("unsupported CBOR type {other}"))),
    }
}
