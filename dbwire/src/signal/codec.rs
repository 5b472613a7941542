//! Framing codec: `[4-byte BE length][1-byte type][payload]`.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    common::trace,
    error::{ProtocolError, Result},
};

use super::{registry::Direction, is_server_type, Factory, Registry, Signal, SignalType};

/// A frame: `length` is derived from `payload`, never stored redundantly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub signal_type: SignalType,
    pub payload: Bytes,
}

impl Message {
    /// The wire length prefix: the type byte plus the payload. Always
    /// `>= 1`.
    pub fn length(&self) -> u32 {
        1 + self.payload.len() as u32
    }
}

/// Packs `signal` into a [`Message`].
pub fn encode_message(signal: &dyn Signal) -> Message {
    let mut buf = BytesMut::with_capacity(signal.size_hint());
    signal.pack(&mut buf);
    Message { signal_type: signal.signal_type(), payload: buf.freeze() }
}

/// Parses a complete, already-framed buffer (header + payload) into a
/// [`Message`], validating the length prefix against the actual payload
/// size.
pub fn decode_message(mut framed: Bytes) -> Result<Message> {
    if framed.remaining() < 5 {
        return Err(ProtocolError::Malformed(crate::common::general!("frame shorter than header").into()).into());
    }
    let length = framed.get_u32();
    if length == 0 {
        return Err(ProtocolError::ZeroLengthFrame.into());
    }
    let signal_type = framed.get_u8();
    let found = framed.remaining() as u32;
    let expected = length - 1;
    if found != expected {
        return Err(ProtocolError::LengthMismatch { expected, found }.into());
    }
    Ok(Message { signal_type, payload: framed })
}

/// Reads exactly one frame off `reader`. A short read anywhere in the
/// header or payload is a fatal I/O error for the owning session.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header).await?;
    let mut head = &header[..];
    let length = head.get_u32();
    if length == 0 {
        return Err(ProtocolError::ZeroLengthFrame.into());
    }
    let signal_type = head.get_u8();
    let payload_len = (length - 1) as usize;

    let mut payload = BytesMut::zeroed(payload_len);
    reader.read_exact(&mut payload).await?;

    trace!("(S) type={signal_type} len={payload_len}");
    Ok(Message { signal_type, payload: payload.freeze() })
}

/// Writes `message`'s header and payload contiguously. Does not flush —
/// callers decide flushing semantics.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> io::Result<()> {
    let mut header = [0u8; 5];
    (&mut header[..]).put_u32(message.length());
    header[4] = message.signal_type;
    writer.write_all(&header).await?;
    writer.write_all(&message.payload).await?;
    trace!("(C) type={} len={}", message.signal_type, message.payload.len());
    Ok(())
}

/// Dispatches a frame to a fresh, typed [`Signal`] instance.
///
/// This is the client side of the wire, so only server-direction types
/// may legitimately arrive here; a client type arriving on a client's
/// read path is a protocol error. Server types in the reserved range
/// that the registry doesn't recognize decode to [`super::ServerUnknown`]
/// rather than erroring, for forward compatibility with new signal
/// types the server may add.
pub fn unpack_signal(message: Message, registry: &Registry, factory: &Factory) -> Result<Box<dyn Signal>> {
    let mut signal: Box<dyn Signal> = match registry.direction_of(message.signal_type) {
        Some(Direction::Client) => {
            return Err(ProtocolError::WrongDirection("client", message.signal_type).into());
        }
        Some(Direction::Server) => factory
            .construct(message.signal_type)
            .ok_or(ProtocolError::UnknownSignalType(message.signal_type))?,
        None if is_server_type(message.signal_type) => {
            Box::new(super::ServerUnknown { signal_type: message.signal_type, payload: Bytes::new() })
        }
        None => return Err(ProtocolError::UnknownSignalType(message.signal_type).into()),
    };

    let mut payload = message.payload;
    signal.unpack(&mut payload)?;
    Ok(signal)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signal::{install_default, ClientPing};

    #[test]
    fn frame_length_matches_payload() {
        let signal = ClientPing { timestamp: 42 };
        let message = encode_message(&signal);
        assert_eq!(message.length(), 1 + message.payload.len() as u32);
    }

    #[test]
    fn decode_rejects_zero_length() {
        let mut framed = BytesMut::new();
        framed.put_u32(0);
        framed.put_u8(4);
        assert!(decode_message(framed.freeze()).is_err());
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let mut framed = BytesMut::new();
        framed.put_u32(10);
        framed.put_u8(4);
        framed.put_slice(b"short");
        assert!(decode_message(framed.freeze()).is_err());
    }

    #[test]
    fn decode_round_trips_a_valid_frame() {
        let signal = ClientPing { timestamp: 1_700_000_000 };
        let message = encode_message(&signal);
        let mut framed = BytesMut::new();
        framed.put_u32(message.length());
        framed.put_u8(message.signal_type);
        framed.put_slice(&message.payload);
        assert_eq!(decode_message(framed.freeze()).unwrap(), message);
    }

    #[test]
    fn unpack_rejects_client_type_arriving_on_client_codec() {
        let mut registry = Registry::new();
        let mut factory = Factory::new();
        install_default(&mut registry, &mut factory).unwrap();

        let message = Message { signal_type: crate::signal::types::CLIENT_PING, payload: Bytes::new() };
        assert!(unpack_signal(message, &registry, &factory).is_err());
    }

    #[test]
    fn unpack_tolerates_reserved_server_codes() {
        let mut registry = Registry::new();
        let mut factory = Factory::new();
        install_default(&mut registry, &mut factory).unwrap();

        let message = Message { signal_type: 110, payload: Bytes::from_static(b"future field") };
        let signal = unpack_signal(message, &registry, &factory).unwrap();
        assert_eq!(signal.signal_type(), 110);
    }

    #[test]
    fn unpack_constructs_registered_server_type() {
        let mut registry = Registry::new();
        let mut factory = Factory::new();
        install_default(&mut registry, &mut factory).unwrap();

        let message = Message { signal_type: crate::signal::types::SERVER_END_OF_STREAM, payload: Bytes::new() };
        let signal = unpack_signal(message, &registry, &factory).unwrap();
        assert_eq!(signal.signal_type(), crate::signal::types::SERVER_END_OF_STREAM);
    }
}
