//! LEB128-style unsigned varint, used by signal payloads that choose a
//! variable-width count or length field.
use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Reads an LEB128-encoded unsigned varint.
///
/// Accepts up to 10 continuation bytes (enough for a full `u64`); anything
/// longer, or a buffer that runs out mid-varint, is a malformed payload.
pub(crate) fn get_uvarint(buf: &mut impl Buf) -> Result<u64, ProtocolError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(ProtocolError::Malformed(
                crate::common::general!("truncated varint").into(),
            ));
        }
        if shift >= 64 {
            return Err(ProtocolError::Malformed(
                crate::common::general!("varint exceeds 64 bits").into(),
            ));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Writes `value` as an LEB128-encoded unsigned varint.
pub(crate) fn put_uvarint(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trips() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = BytesMut::new();
            put_uvarint(&mut buf, value);
            let mut bytes = buf.freeze();
            assert_eq!(get_uvarint(&mut bytes).unwrap(), value);
            assert!(!bytes.has_remaining());
        }
    }

    #[test]
    fn single_byte_values_fit_in_one_byte() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, 42);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn truncated_varint_errors() {
        let mut bytes = bytes::Bytes::from_static(&[0x80, 0x80]);
        assert!(get_uvarint(&mut bytes).is_err());
    }
}
