use bytes::Bytes;

/// A cheaply cloneable and sliceable string.
///
/// Avoids allocating an owned `String` for the field strings carried by
/// every signal (table names, column names, error messages, ...).
#[derive(Clone, Default, Eq)]
pub struct ByteStr {
    bytes: Bytes,
}

impl ByteStr {
    /// Creates a `ByteStr` by copying the given string.
    pub fn copy_from_str(s: &str) -> Self {
        Self { bytes: Bytes::copy_from_slice(s.as_bytes()) }
    }

    /// Creates a `ByteStr` from an owned, already-validated UTF-8 buffer.
    pub fn from_utf8(bytes: Bytes) -> Result<Self, std::str::Utf8Error> {
        std::str::from_utf8(&bytes)?;
        Ok(Self { bytes })
    }

    /// Creates a `ByteStr` pointing directly at a `'static` string, no copy.
    pub const fn from_static(s: &'static str) -> Self {
        Self { bytes: Bytes::from_static(s.as_bytes()) }
    }

    /// Returns a `ByteStr` that shares this buffer's allocation, `O(1)`.
    ///
    /// # Panics
    ///
    /// Panics if `subset` is not a sub-slice of `self`, see [`Bytes::slice_ref`].
    pub fn slice_ref(&self, subset: &str) -> Self {
        Self { bytes: Bytes::slice_ref(&self.bytes, subset.as_bytes()) }
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: construction always validates utf8.
        unsafe { std::str::from_utf8_unchecked(&self.bytes) }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

impl AsRef<str> for ByteStr {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::ops::Deref for ByteStr {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl From<&'static str> for ByteStr {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl From<String> for ByteStr {
    fn from(value: String) -> Self {
        Self { bytes: Bytes::from(value.into_bytes()) }
    }
}

impl From<&str> for ByteStr {
    fn from(value: &str) -> Self {
        Self::copy_from_str(value)
    }
}

macro_rules! from_integer {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for ByteStr {
                fn from(value: $ty) -> Self {
                    Self::copy_from_str(itoa::Buffer::new().format(value))
                }
            }
        )+
    };
}

from_integer!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_integers_without_allocating_a_string_first() {
        assert_eq!(ByteStr::from(42i32), "42");
        assert_eq!(ByteStr::from(-7i64), "-7");
        assert_eq!(ByteStr::from(255u8), "255");
    }
}

impl PartialEq for ByteStr {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl PartialEq<str> for ByteStr {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ByteStr {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl std::fmt::Display for ByteStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for ByteStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.as_str(), f)
    }
}

impl std::hash::Hash for ByteStr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}
