//! Supporting utility types shared across the crate.

mod bytestr;
mod general;
mod varint;

pub use bytestr::ByteStr;
pub(crate) use general::{general, GeneralError};
pub(crate) use varint::{get_uvarint, put_uvarint};

/// Type-erased error, used where a variant just needs to carry *some* source.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

macro_rules! trace {
    ($($tt:tt)*) => {
        #[cfg(feature = "log-verbose")] log::trace!($($tt)*)
    };
}

macro_rules! debug {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")] log::debug!($($tt)*)
    };
}

macro_rules! warn_ {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")] log::warn!($($tt)*)
    };
}

macro_rules! error_ {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")] log::error!($($tt)*)
    };
}

pub(crate) use debug;
pub(crate) use error_;
pub(crate) use trace;
pub(crate) use warn_;
