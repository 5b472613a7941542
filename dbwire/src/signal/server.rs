//! Server-originated signal variants (spec §4.2).
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    common::{get_uvarint, put_uvarint, ByteStr},
    error::Result,
};

use super::{
    registry::{Direction, Factory, Registry, SignalInfo},
    signal_impl,
    wire::{get_be_string, get_i64, get_u64, get_u8, get_varint_string, put_be_string, put_varint_string},
    types, Signal, SignalType,
};

/// The handshake response (spec §4.3 step 2). Strings use the 4-byte BE
/// prefix like client signals (spec §6), not the varint prefix other
/// server signals use.
///
/// `revision` is parsed defensively (spec §9's ambiguity note): the first
/// complete varint is taken as the value and any trailing bytes belong to
/// the fields that follow, so a server sending a wider-than-expected
/// encoding for this field does not desync the rest of the payload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_name: ByteStr,
    pub major: u8,
    pub minor: u8,
    pub revision: u64,
    pub timezone: ByteStr,
    pub display_name: ByteStr,
    pub version_patch: u64,
}

impl ServerHello {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_be_string(buf, &self.server_name);
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
        put_uvarint(buf, self.revision);
        put_be_string(buf, &self.timezone);
        put_be_string(buf, &self.display_name);
        put_uvarint(buf, self.version_patch);
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.server_name = get_be_string(buf)?;
        self.major = get_u8(buf)?;
        self.minor = get_u8(buf)?;
        self.revision = get_uvarint(buf)?;
        self.timezone = get_be_string(buf)?;
        self.display_name = get_be_string(buf)?;
        self.version_patch = get_uvarint(buf)?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        10 + self.server_name.len() + self.timezone.len() + self.display_name.len()
    }
}

signal_impl!(ServerHello, types::SERVER_HELLO, "ServerHello", Direction::Server);

/// Column layout plus one data block of rows (spec §4.2, §9's documented
/// limitation: values are comma-joined text, so embedded commas corrupt
/// decoding — this is inherited from the protocol, not fixed here).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerData {
    /// `(name, type_tag)` per column, in wire order.
    pub columns: Vec<(ByteStr, ByteStr)>,
    /// Reserved; currently always decoded and re-encoded verbatim.
    pub block_marker: u64,
    pub row_count: u64,
    /// One comma-joined string of textual values per column.
    pub column_values: Vec<ByteStr>,
}

impl ServerData {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_uvarint(buf, self.columns.len() as u64);
        for (name, type_tag) in &self.columns {
            put_varint_string(buf, name);
            put_varint_string(buf, type_tag);
        }
        put_uvarint(buf, self.block_marker);
        put_uvarint(buf, self.row_count);
        for column in &self.column_values {
            put_varint_string(buf, column);
        }
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        let column_count = get_uvarint(buf)? as usize;
        self.columns = (0..column_count)
            .map(|_| Ok((get_varint_string(buf)?, get_varint_string(buf)?)))
            .collect::<Result<_>>()?;
        self.block_marker = get_uvarint(buf)?;
        self.row_count = get_uvarint(buf)?;
        self.column_values = (0..column_count).map(|_| get_varint_string(buf)).collect::<Result<_>>()?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        let columns: usize = self.columns.iter().map(|(n, t)| n.len() + t.len() + 4).sum();
        let values: usize = self.column_values.iter().map(|v| v.len() + 2).sum();
        8 + columns + values
    }
}

signal_impl!(ServerData, types::SERVER_DATA, "ServerData", Direction::Server);

/// An in-band error reported for the current turn (spec §7 class 3).
///
/// `code` must be preserved byte-for-byte; callers match on it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerException {
    pub code: ByteStr,
    pub message: ByteStr,
    pub stack: ByteStr,
}

impl ServerException {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_varint_string(buf, &self.code);
        put_varint_string(buf, &self.message);
        put_varint_string(buf, &self.stack);
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.code = get_varint_string(buf)?;
        self.message = get_varint_string(buf)?;
        self.stack = get_varint_string(buf)?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        self.code.len() + self.message.len() + self.stack.len() + 6
    }
}

signal_impl!(ServerException, types::SERVER_EXCEPTION, "ServerException", Direction::Server);

/// Progress accounting emitted mid-turn; per spec §4.3 the turn loop
/// accumulates or ignores these and keeps reading.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerProgress {
    pub rows_read: u64,
    pub bytes_read: u64,
    pub total_rows: u64,
    pub total_bytes: u64,
    pub elapsed_micros: u64,
}

impl ServerProgress {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_uvarint(buf, self.rows_read);
        put_uvarint(buf, self.bytes_read);
        put_uvarint(buf, self.total_rows);
        put_uvarint(buf, self.total_bytes);
        buf.put_u64(self.elapsed_micros);
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.rows_read = get_uvarint(buf)?;
        self.bytes_read = get_uvarint(buf)?;
        self.total_rows = get_uvarint(buf)?;
        self.total_bytes = get_uvarint(buf)?;
        self.elapsed_micros = get_u64(buf)?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        8 + 4 * 5
    }
}

signal_impl!(ServerProgress, types::SERVER_PROGRESS, "ServerProgress", Direction::Server);

/// The reply to [`super::ClientPing`]; carries back the same timestamp.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerPong {
    pub timestamp: i64,
}

impl ServerPong {
    fn pack_body(&self, buf: &mut BytesMut) {
        buf.put_i64(self.timestamp);
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.timestamp = get_i64(buf)?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        8
    }
}

signal_impl!(ServerPong, types::SERVER_PONG, "ServerPong", Direction::Server);

/// The normal turn-terminating message (spec's "EOS"); an empty payload,
/// its mere presence is the signal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerEndOfStream;

impl ServerEndOfStream {
    fn pack_body(&self, _buf: &mut BytesMut) {}

    fn unpack_body(&mut self, _buf: &mut Bytes) -> Result<()> {
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        0
    }
}

signal_impl!(ServerEndOfStream, types::SERVER_END_OF_STREAM, "ServerEndOfStream", Direction::Server);

/// Server-initiated close, fatal to the session (spec §4.3, §7 class 4).
/// Strings use the 4-byte BE prefix, like [`ServerHello`] (spec §6).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerClose {
    pub reason: ByteStr,
}

impl ServerClose {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_be_string(buf, &self.reason);
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.reason = get_be_string(buf)?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        4 + self.reason.len()
    }
}

signal_impl!(ServerClose, types::SERVER_CLOSE, "ServerClose", Direction::Server);

/// Profiling summary for a completed turn (spec §4.2).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerProfileInfo {
    pub rows_before_limit: u64,
    pub bytes_before_limit: u64,
    pub applied_limit: u64,
    pub applied_offset: u64,
    pub rows_read: u64,
    pub bytes_read: u64,
}

impl ServerProfileInfo {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_uvarint(buf, self.rows_before_limit);
        put_uvarint(buf, self.bytes_before_limit);
        put_uvarint(buf, self.applied_limit);
        put_uvarint(buf, self.applied_offset);
        put_uvarint(buf, self.rows_read);
        put_uvarint(buf, self.bytes_read);
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.rows_before_limit = get_uvarint(buf)?;
        self.bytes_before_limit = get_uvarint(buf)?;
        self.applied_limit = get_uvarint(buf)?;
        self.applied_offset = get_uvarint(buf)?;
        self.rows_read = get_uvarint(buf)?;
        self.bytes_read = get_uvarint(buf)?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        4 * 6
    }
}

signal_impl!(ServerProfileInfo, types::SERVER_PROFILE_INFO, "ServerProfileInfo", Direction::Server);

/// Stand-in for a server signal type the registry doesn't recognize
/// (reserved codes 107-115, or a future extension the codec hasn't learned
/// yet). The codec constructs this directly — it is never installed in the
/// [`Factory`] under a fixed type — and the turn loop ignores it after
/// reading the full payload (spec §6: "decoders must tolerate and skip
/// them").
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerUnknown {
    pub signal_type: SignalType,
    pub payload: Bytes,
}

impl Signal for ServerUnknown {
    fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    fn pack(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.payload);
    }

    fn unpack(&mut self, buf: &mut Bytes) -> Result<()> {
        self.payload = buf.split_off(0);
        Ok(())
    }

    fn size_hint(&self) -> usize {
        self.payload.len()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn register(_registry: &mut Registry, _factory: &mut Factory) -> Result<()> {
        // Deliberately not installed under a fixed SignalType: the codec
        // constructs it ad hoc for whatever reserved/unknown code arrives.
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pack_unpack<T: Signal + Default + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = BytesMut::new();
        value.pack(&mut buf);
        let mut roundtrip = T::default();
        roundtrip.unpack(&mut buf.freeze()).unwrap();
        assert_eq!(value, roundtrip);
    }

    #[test]
    fn server_hello_round_trips() {
        pack_unpack(ServerHello {
            server_name: "dbserver".into(),
            major: 24,
            minor: 3,
            revision: 54451,
            timezone: "UTC".into(),
            display_name: "dbserver 24.3".into(),
            version_patch: 2,
        });
    }

    #[test]
    fn server_hello_tolerates_defensive_revision_parsing() {
        // Two differently-shaped (but both well-formed varint) revisions
        // must decode to their documented field (spec §9 ambiguity note).
        for revision in [0u64, 54451, 100_000_000] {
            pack_unpack(ServerHello { revision, ..Default::default() });
        }
    }

    #[test]
    fn server_data_round_trips() {
        pack_unpack(ServerData {
            columns: vec![("id".into(), "UInt32".into()), ("name".into(), "String".into())],
            block_marker: 0,
            row_count: 3,
            column_values: vec!["1,2,3".into(), "a,b,c".into()],
        });
    }

    #[test]
    fn server_exception_round_trips() {
        pack_unpack(ServerException {
            code: "query.table_not_found".into(),
            message: "Table 'missing' does not exist".into(),
            stack: "".into(),
        });
    }

    #[test]
    fn server_end_of_stream_has_empty_payload() {
        let mut buf = BytesMut::new();
        ServerEndOfStream.pack(&mut buf);
        assert!(buf.is_empty());
    }

    #[test]
    fn server_close_round_trips() {
        pack_unpack(ServerClose { reason: "idle timeout".into() });
    }

    #[test]
    fn server_pong_rejects_truncated_payload() {
        let mut pong = ServerPong::default();
        let mut payload = Bytes::from_static(b"\x01\x02\x03");
        assert!(pong.unpack(&mut payload).is_err());
    }

    #[test]
    fn server_progress_rejects_truncated_elapsed_micros() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, 1);
        put_uvarint(&mut buf, 2);
        put_uvarint(&mut buf, 3);
        put_uvarint(&mut buf, 4);
        buf.put_u8(0xff); // one byte of an 8-byte elapsed_micros
        let mut progress = ServerProgress::default();
        assert!(progress.unpack(&mut buf.freeze()).is_err());
    }

    #[test]
    fn server_hello_rejects_truncated_major_minor() {
        let mut buf = BytesMut::new();
        put_be_string(&mut buf, "dbserver");
        buf.put_u8(24); // major only, minor missing
        let mut hello = ServerHello::default();
        assert!(hello.unpack(&mut buf.freeze()).is_err());
    }

    #[test]
    fn server_unknown_captures_full_payload() {
        let mut unknown = ServerUnknown { signal_type: 110, payload: Bytes::new() };
        let mut payload = Bytes::from_static(b"whatever future field layout");
        unknown.unpack(&mut payload).unwrap();
        assert_eq!(unknown.payload, Bytes::from_static(b"whatever future field layout"));
    }
}
