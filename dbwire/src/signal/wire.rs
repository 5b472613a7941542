//! Shared string encodings used across signal payloads.
//!
//! Client signals and `ServerHello`/`ServerClose` use a 4-byte big-endian
//! length prefix; every other server signal uses a varint length prefix
//! (reflecting the protocol's ClickHouse-ish lineage).
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    common::{get_uvarint, put_uvarint, ByteStr},
    error::{ProtocolError, Result},
};

pub(crate) fn put_be_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

pub(crate) fn get_be_string(buf: &mut Bytes) -> Result<ByteStr> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Malformed(crate::common::general!("truncated string length").into()).into());
    }
    let len = buf.get_u32() as usize;
    take_str(buf, len)
}

pub(crate) fn put_varint_string(buf: &mut BytesMut, s: &str) {
    put_uvarint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

pub(crate) fn get_varint_string(buf: &mut Bytes) -> Result<ByteStr> {
    let len = get_uvarint(buf).map_err(crate::error::Error::from)? as usize;
    take_str(buf, len)
}

fn take_str(buf: &mut Bytes, len: usize) -> Result<ByteStr> {
    if buf.remaining() < len {
        return Err(ProtocolError::Malformed(crate::common::general!("truncated string body").into()).into());
    }
    let bytes = buf.split_to(len);
    ByteStr::from_utf8(bytes)
        .map_err(|e| ProtocolError::Malformed(Box::new(e)).into())
}

/// Checked fixed-width reads: every `unpack_body` must use these instead of
/// calling `Buf::get_*` directly, since a short payload is framed-valid and
/// must fail as a protocol error rather than panic.
pub(crate) fn get_u8(buf: &mut Bytes) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Malformed(crate::common::general!("truncated u8").into()).into());
    }
    Ok(buf.get_u8())
}

pub(crate) fn get_u32(buf: &mut Bytes) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Malformed(crate::common::general!("truncated u32").into()).into());
    }
    Ok(buf.get_u32())
}

pub(crate) fn get_u64(buf: &mut Bytes) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(ProtocolError::Malformed(crate::common::general!("truncated u64").into()).into());
    }
    Ok(buf.get_u64())
}

pub(crate) fn get_i64(buf: &mut Bytes) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(ProtocolError::Malformed(crate::common::general!("truncated i64").into()).into());
    }
    Ok(buf.get_i64())
}
