//! Crate-wide error type.
//!
//! Follows the taxonomy of the wire protocol: transport errors, protocol
//! framing errors, in-band server exceptions, server-initiated close, pool
//! acquisition errors, and local usage errors. Each is one variant so callers
//! can match on `ErrorKind`-shaped behavior without downcasting.
use std::io;

use crate::common::BoxError;
use crate::session::config::ParseError;
use crate::value::DecodeError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A protocol-level error: malformed frame, wrong message in a given phase,
/// or an arrival on the wrong side of the client/server divide.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("zero-length frame")]
    ZeroLengthFrame,

    #[error("frame payload length mismatch: header said {expected}, got {found}")]
    LengthMismatch { expected: u32, found: u32 },

    #[error("signal type {0} is not registered")]
    UnknownSignalType(u8),

    #[error("signal type {0} is reserved and not yet assigned a direction")]
    ReservedSignalType(u8),

    #[error("received a {0}-direction signal type {1} on a {0} codec")]
    WrongDirection(&'static str, u8),

    #[error("expected {expected} during {phase}, got signal type {found}")]
    UnexpectedSignal {
        expected: &'static str,
        found: u8,
        phase: &'static str,
    },

    #[error("malformed payload: {0}")]
    Malformed(BoxError),
}

/// A typed in-band exception reported by the server for a turn.
///
/// `code` is a stable short string (e.g. `query.table_not_found`) and must be
/// preserved byte-for-byte; callers may match on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ServerException {
    pub code: String,
    pub message: String,
    pub stack: String,
}

/// All possible errors returned from this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Server(#[from] ServerException),

    #[error("server closed connection: {0}")]
    ServerClosed(String),

    #[error("configuration error: {0}")]
    Configuration(#[from] ParseError),

    #[error("pool is closed")]
    PoolClosed,

    #[error("acquire cancelled")]
    AcquireCancelled,

    #[error("usage error: {0}")]
    Usage(BoxError),

    #[error("no rows in result set")]
    NoRows,

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl Error {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into().into())
    }
}
