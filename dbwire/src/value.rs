//! Textual value conversion for scanned row data.
//!
//! `ServerData` carries every value as its textual representation; there
//! is no wire-level type tag beyond the column's `type_tag` string, so
//! conversion into scalar Rust types happens entirely on the client and
//! entirely from `&str`.

/// Failure converting one column's text into a requested Rust type.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot parse {value:?} as {target}")]
    Invalid { value: String, target: &'static str },
}

impl DecodeError {
    fn invalid(value: &str, target: &'static str) -> Self {
        Self::Invalid { value: value.to_string(), target }
    }
}

/// A type a column's textual value can be converted into.
pub trait Decode: Sized {
    fn decode(value: &str) -> Result<Self, DecodeError>;
}

impl Decode for String {
    fn decode(value: &str) -> Result<Self, DecodeError> {
        Ok(value.to_string())
    }
}

impl Decode for bool {
    fn decode(value: &str) -> Result<Self, DecodeError> {
        match value {
            "1" | "true" | "t" | "TRUE" => Ok(true),
            "0" | "false" | "f" | "FALSE" => Ok(false),
            _ => Err(DecodeError::invalid(value, "bool")),
        }
    }
}

macro_rules! decode_via_fromstr {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Decode for $ty {
                fn decode(value: &str) -> Result<Self, DecodeError> {
                    value.trim().parse().map_err(|_| DecodeError::invalid(value, stringify!($ty)))
                }
            }
        )*
    };
}

decode_via_fromstr!(i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64);

#[cfg(feature = "time")]
mod timestamp {
    use super::{Decode, DecodeError};
    use time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime, PrimitiveDateTime};

    // The tolerant, offset-less layout Go's `time.Time` produces with its
    // zero-value `String()`/`%v` formatting (e.g. what a ClickHouse-lineage
    // server often emits for a column without an explicit timezone).
    const GO_DEFAULT: &[time::format_description::FormatItem<'_>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

    /// Parses a column's textual value as a timestamp, trying RFC3339
    /// first and falling back to the "Go-default"-ish bare layout.
    impl Decode for OffsetDateTime {
        fn decode(value: &str) -> Result<Self, DecodeError> {
            if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
                return Ok(parsed);
            }
            if let Ok(parsed) = PrimitiveDateTime::parse(value, GO_DEFAULT) {
                return Ok(parsed.assume_utc());
            }
            Err(DecodeError::invalid(value, "OffsetDateTime"))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_integers_and_floats() {
        assert_eq!(i32::decode("42").unwrap(), 42);
        assert_eq!(f64::decode("3.5").unwrap(), 3.5);
    }

    #[test]
    fn parses_bool_variants() {
        assert!(bool::decode("true").unwrap());
        assert!(!bool::decode("0").unwrap());
        assert!(bool::decode("nope").is_err());
    }

    #[cfg(feature = "time")]
    #[test]
    fn parses_rfc3339_and_go_default_timestamps() {
        use time::OffsetDateTime;
        let rfc = OffsetDateTime::decode("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(rfc.year(), 2024);
        let go_default = OffsetDateTime::decode("2024-01-02 03:04:05").unwrap();
        assert_eq!(go_default.year(), 2024);
    }
}
