//! Client-originated signal variants.
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    common::{put_uvarint, ByteStr},
    error::Result,
};

use super::{
    registry::{Direction, Factory, Registry, SignalInfo},
    signal_impl,
    wire::{get_be_string, get_i64, get_u32, put_be_string},
    types, Signal, SignalType,
};

/// Sent once, immediately after connect, as the first step of the
/// handshake.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_name: ByteStr,
    pub major: u64,
    pub minor: u64,
    pub protocol_version: u64,
}

impl ClientHello {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_be_string(buf, &self.client_name);
        put_uvarint(buf, self.major);
        put_uvarint(buf, self.minor);
        put_uvarint(buf, self.protocol_version);
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.client_name = get_be_string(buf)?;
        self.major = crate::common::get_uvarint(buf)?;
        self.minor = crate::common::get_uvarint(buf)?;
        self.protocol_version = crate::common::get_uvarint(buf)?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        4 + self.client_name.len() + 3
    }
}

signal_impl!(ClientHello, types::CLIENT_HELLO, "ClientHello", Direction::Client);

/// A query or exec turn's request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientQuery {
    pub query: ByteStr,
    pub query_id: ByteStr,
    pub database: ByteStr,
    pub user: ByteStr,
    pub password: ByteStr,
}

impl ClientQuery {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_be_string(buf, &self.query);
        put_be_string(buf, &self.query_id);
        put_be_string(buf, &self.database);
        put_be_string(buf, &self.user);
        put_be_string(buf, &self.password);
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.query = get_be_string(buf)?;
        self.query_id = get_be_string(buf)?;
        self.database = get_be_string(buf)?;
        self.user = get_be_string(buf)?;
        self.password = get_be_string(buf)?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        20 + self.query.len() + self.query_id.len() + self.database.len() + self.user.len() + self.password.len()
    }
}

signal_impl!(ClientQuery, types::CLIENT_QUERY, "ClientQuery", Direction::Client);

/// A batch turn's request: one row-wise ingest into `table_name`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientData {
    pub table_name: ByteStr,
    pub columns: Vec<ByteStr>,
    /// Row-major: `rows[i]` holds one value per entry of `columns`.
    pub rows: Vec<Vec<ByteStr>>,
}

impl ClientData {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_be_string(buf, &self.table_name);
        buf.put_u32(self.columns.len() as u32);
        buf.put_u32(self.rows.len() as u32);
        for column in &self.columns {
            put_be_string(buf, column);
        }
        for row in &self.rows {
            for value in row {
                put_be_string(buf, value);
            }
        }
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.table_name = get_be_string(buf)?;
        let column_count = get_u32(buf)? as usize;
        let row_count = get_u32(buf)? as usize;
        self.columns = (0..column_count).map(|_| get_be_string(buf)).collect::<Result<_>>()?;
        self.rows = (0..row_count)
            .map(|_| (0..column_count).map(|_| get_be_string(buf)).collect::<Result<_>>())
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        let values: usize = self.rows.iter().flatten().map(|v| 4 + v.len()).sum();
        let columns: usize = self.columns.iter().map(|c| 4 + c.len()).sum();
        12 + self.table_name.len() + columns + values
    }
}

signal_impl!(ClientData, types::CLIENT_DATA, "ClientData", Direction::Client);

/// Requests cancellation of an in-flight query.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientCancel {
    pub query_id: ByteStr,
}

impl ClientCancel {
    fn pack_body(&self, buf: &mut BytesMut) {
        put_be_string(buf, &self.query_id);
    }

    fn unpack_body(&mut self, buf: &mut Bytes) -> Result<()> {
        self.query_id = get_be_string(buf)?;
        Ok(())
    }

    fn size_hint_body(&self) -> usize {
        4 + self.query_id.len()
    }
}

signal_impl!(ClientCancel, types::CLIENT_CANCEL, "ClientCancel", Direction::Client);

/// A liveness probe; the server must answer with [`super::ServerPong`]
/// carrying the same timestamp.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientPing {
    pub timestamp: i64,
}

impl ClientPing {
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

signal_impl!(ClientPing, types::CLIENT_PING, "ClientPing", Direction::Client);
