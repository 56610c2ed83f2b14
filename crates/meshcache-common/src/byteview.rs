//! Immutable byte payloads returned by the cache.

use bytes::Bytes;
use std::fmt;

/// An immutable view over a cached value.
///
/// The payload is reference-counted and read-only: cloning a `ByteView` is
/// cheap and no holder can mutate the bytes another holder sees, so the
/// cache never needs to copy on read.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ByteView {
    bytes: Bytes,
}

impl ByteView {
    /// Length of the payload in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the payload
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Copy the payload into an owned `Vec<u8>`
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// The underlying shared buffer
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(v: Vec<u8>) -> Self {
        Self {
            bytes: Bytes::from(v),
        }
    }
}

impl From<Bytes> for ByteView {
    fn from(bytes: Bytes) -> Self {
        Self { bytes }
    }
}

impl From<&str> for ByteView {
    fn from(s: &str) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(s.as_bytes()),
        }
    }
}

impl fmt::Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({} bytes)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_storage() {
        let view = ByteView::from("630");
        let other = view.clone();
        assert_eq!(view.as_slice(), other.as_slice());
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn test_to_vec_is_a_copy() {
        let view = ByteView::from(vec![1u8, 2, 3]);
        let mut copied = view.to_vec();
        copied[0] = 9;
        assert_eq!(view.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_display_lossy_utf8() {
        assert_eq!(ByteView::from("scores").to_string(), "scores");
    }
}
