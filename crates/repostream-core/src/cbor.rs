//! Small DAG-CBOR reading helpers shared by the archive, tree and frame
//! decoders. DAG-CBOR forbids indefinite-length items, so these reject them.

use minicbor::data::Type;
use minicbor::decode::Error;
use minicbor::Decoder;

use crate::cid::{Cid, LINK_TAG};
use crate::error::CidError;

pub fn map_len(dec: &mut Decoder<'_>) -> Result<u64, Error> {
    dec.map()?
        .ok_or_else(|| Error::message("indefinite-length map"))
}

pub fn array_len(dec: &mut Decoder<'_>) -> Result<u64, Error> {
    dec.array()?
        .ok_or_else(|| Error::message("indefinite-length array"))
}

/// Returns `true` (and consumes it) if the next item is CBOR null.
pub fn take_null(dec: &mut Decoder<'_>) -> Result<bool, Error> {
    if matches!(dec.datatype()?, Type::Null) {
        dec.null()?;
        return Ok(true);
    }
    Ok(false)
}

/// Read a tag-42 CID link.
pub fn link<E>(dec: &mut Decoder<'_>) -> Result<Cid, E>
where
    E: From<Error> + From<CidError>,
{
    let tag = dec.tag()?;
    if tag.as_u64() != LINK_TAG {
        return Err(Error::message(format!("expected CID link, found tag {}", tag.as_u64())).into());
    }
    Ok(Cid::from_link_bytes(dec.bytes()?)?)
}

/// Read a CID link that may be null.
pub fn optional_link<E>(dec: &mut Decoder<'_>) -> Result<Option<Cid>, E>
where
    E: From<Error> + From<CidError>,
{
    if take_null(dec)? {
        return Ok(None);
    }
    link(dec).map(Some)
}

/// Read a text string that may be null.
pub fn optional_str<'b>(dec: &mut Decoder<'b>) -> Result<Option<&'b str>, Error> {
    if take_null(dec)? {
        return Ok(None);
    }
    dec.str().map(Some)
}
