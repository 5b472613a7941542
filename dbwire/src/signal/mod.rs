//! The signal catalog: wire types, registry/factory, and framing codec.
//!
//! A [`Signal`] is a typed, variant-bearing protocol message. Concrete
//! variants live in [`client`] and [`server`]; this module ties them
//! together behind one object-safe interface plus the [`Registry`]/
//! [`Factory`] pair the codec uses to go from raw bytes to a typed value
//! without a fixed, closed `enum`.
use std::any::Any;

use bytes::{Bytes, BytesMut};

use crate::error::Result;

mod client;
mod codec;
mod registry;
mod server;
mod wire;

pub use client::{ClientCancel, ClientData, ClientHello, ClientPing, ClientQuery};
pub use codec::{decode_message, encode_message, read_message, unpack_signal, write_message, Message};
pub use registry::{Direction, Factory, Registry, SignalInfo};
pub use server::{
    ServerClose, ServerData, ServerEndOfStream, ServerException, ServerHello, ServerPong,
    ServerProfileInfo, ServerProgress, ServerUnknown,
};

/// One-byte wire identifier for a signal variant.
///
/// Client-originated types occupy `0..64`; server-originated types occupy
/// `100..`. The direction of a value is derivable from the value alone.
pub type SignalType = u8;

/// Well-known [`SignalType`] values fixed by the wire format.
pub mod types {
    use super::SignalType;

    pub const CLIENT_HELLO: SignalType = 0;
    pub const CLIENT_QUERY: SignalType = 1;
    pub const CLIENT_DATA: SignalType = 2;
    pub const CLIENT_CANCEL: SignalType = 3;
    pub const CLIENT_PING: SignalType = 4;

    pub const SERVER_HELLO: SignalType = 100;
    pub const SERVER_DATA: SignalType = 101;
    pub const SERVER_EXCEPTION: SignalType = 102;
    pub const SERVER_PROGRESS: SignalType = 103;
    pub const SERVER_PONG: SignalType = 104;
    pub const SERVER_END_OF_STREAM: SignalType = 105;
    pub const SERVER_PROFILE_INFO: SignalType = 106;
    pub const SERVER_CLOSE: SignalType = 116;
}

/// `true` for the client-originated range (`0..64`).
pub const fn is_client_type(ty: SignalType) -> bool {
    ty < 64
}

/// `true` for the server-originated range (`>= 100`).
pub const fn is_server_type(ty: SignalType) -> bool {
    ty >= 100
}

/// A typed protocol message.
///
/// Each concrete variant owns its fields; this interface hides the variant
/// behind `pack`/`unpack`. Object safety is preserved by excluding
/// `register` (a `Self: Sized`-bound
/// associated function) from the vtable — callers reach it through the
/// concrete type, normally only from [`install_default`].
pub trait Signal: std::fmt::Debug + Any + Send + 'static {
    /// This variant's fixed wire type.
    fn signal_type(&self) -> SignalType;

    /// Serializes this signal's payload (header framing is the codec's job).
    fn pack(&self, buf: &mut BytesMut);

    /// Deserializes `buf` into `self`, replacing any prior contents.
    fn unpack(&mut self, buf: &mut Bytes) -> Result<()>;

    /// A hint for how many bytes [`pack`][Signal::pack] is likely to write.
    fn size_hint(&self) -> usize {
        0
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Installs this variant's prototype and constructor.
    ///
    /// Called once per [`Registry`]/[`Factory`] pair, at construction time;
    /// a duplicate registration is a programmer error, surfaced as a
    /// `ProtocolError`.
    fn register(registry: &mut Registry, factory: &mut Factory) -> Result<()>
    where
        Self: Sized;
}

/// Downcasts a `&dyn Signal` to a concrete variant, for turn loops that
/// need to match on which server signal just arrived.
pub fn downcast_ref<T: Signal>(signal: &dyn Signal) -> Option<&T> {
    signal.as_any().downcast_ref::<T>()
}

/// Boilerplate every [`Signal`] impl shares: the `Signal` trait body plus
/// the `register` hookup, given each type's own `pack_body`/`unpack_body`/
/// `size_hint_body` inherent methods.
macro_rules! signal_impl {
    ($ty:ty, $wire:expr, $name:literal, $dir:expr) => {
        impl Signal for $ty {
            fn signal_type(&self) -> SignalType {
                $wire
            }

            fn pack(&self, buf: &mut bytes::BytesMut) {
                self.pack_body(buf)
            }

            fn unpack(&mut self, buf: &mut bytes::Bytes) -> crate::error::Result<()> {
                self.unpack_body(buf)
            }

            fn size_hint(&self) -> usize {
                self.size_hint_body()
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }

            fn register(registry: &mut Registry, factory: &mut Factory) -> crate::error::Result<()> {
                registry.register($wire, SignalInfo { name: $name, direction: $dir, version: 1 })?;
                factory.install($wire, || Box::new(<$ty>::default()));
                Ok(())
            }
        }
    };
}

pub(crate) use signal_impl;

/// Registers every well-known signal variant into a fresh
/// [`Registry`]/[`Factory`] pair.
///
/// Called once when a pool (or a standalone session) is built; the result
/// is shared immutably by every session it creates.
pub fn install_default(registry: &mut Registry, factory: &mut Factory) -> Result<()> {
    ClientHello::register(registry, factory)?;
    ClientQuery::register(registry, factory)?;
    ClientData::register(registry, factory)?;
    ClientCancel::register(registry, factory)?;
    ClientPing::register(registry, factory)?;

    ServerHello::register(registry, factory)?;
    ServerData::register(registry, factory)?;
    ServerException::register(registry, factory)?;
    ServerProgress::register(registry, factory)?;
    ServerPong::register(registry, factory)?;
    ServerEndOfStream::register(registry, factory)?;
    ServerProfileInfo::register(registry, factory)?;
    ServerClose::register(registry, factory)?;

    Ok(())
}
