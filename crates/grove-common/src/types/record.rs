//! Keys, operations, and records.
//!
//! GroveDB keys are fixed-width 64-bit unsigned integers. Ordering is
//! numeric, which is identical to lexicographic ordering of the key's
//! big-endian byte encoding.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fixed-width database key.
///
/// # Example
///
/// ```rust
/// use grove_common::types::Key;
///
/// let key = Key::new(42);
/// assert_eq!(key.as_u64(), 42);
/// assert!(key < Key::new(43));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Key(u64);

impl Key {
    /// The smallest key.
    pub const MIN: Self = Self(0);

    /// The largest key. Doubles as the +∞ sentinel for segment upper bounds.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new key from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(key: u64) -> Self {
        Self(key)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Encodes the key in big-endian byte order (the on-disk ordering).
    #[inline]
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decodes a key from big-endian bytes.
    #[inline]
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Returns the smallest key strictly greater than this one, saturating
    /// at [`Key::MAX`].
    #[inline]
    #[must_use]
    pub const fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Key {
    #[inline]
    fn from(key: u64) -> Self {
        Self::new(key)
    }
}

impl From<Key> for u64 {
    #[inline]
    fn from(key: Key) -> Self {
        key.0
    }
}

/// The kind of operation a record represents.
///
/// Deletions travel through the memtable and onto pages as tombstones so
/// that a delete can shadow an older write sitting in an earlier page of an
/// overflow chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpKind {
    /// An insert or update.
    Write = 0,
    /// A deletion tombstone.
    Delete = 1,
}

impl OpKind {
    /// Decodes an op kind from its on-disk byte.
    #[inline]
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Write),
            1 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Returns the on-disk byte encoding.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true if this is a deletion tombstone.
    #[inline]
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// A single key-value mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The record key.
    pub key: Key,
    /// The opaque value. Empty for tombstones.
    pub value: Bytes,
    /// Write or delete.
    pub kind: OpKind,
}

impl Record {
    /// Creates a write record.
    #[inline]
    #[must_use]
    pub fn write(key: Key, value: Bytes) -> Self {
        Self {
            key,
            value,
            kind: OpKind::Write,
        }
    }

    /// Creates a deletion tombstone.
    #[inline]
    #[must_use]
    pub fn tombstone(key: Key) -> Self {
        Self {
            key,
            value: Bytes::new(),
            kind: OpKind::Delete,
        }
    }

    /// Returns true if this record is a deletion tombstone.
    #[inline]
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.kind.is_tombstone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_byte_order_matches_numeric_order() {
        let a = Key::new(0x0100);
        let b = Key::new(0x00FF);
        assert!(b < a);
        assert!(b.to_be_bytes() < a.to_be_bytes());

        assert_eq!(Key::from_be_bytes(a.to_be_bytes()), a);
    }

    #[test]
    fn test_key_successor() {
        assert_eq!(Key::new(10).successor(), Key::new(11));
        assert_eq!(Key::MAX.successor(), Key::MAX);
    }

    #[test]
    fn test_op_kind_roundtrip() {
        assert_eq!(OpKind::from_u8(OpKind::Write.as_u8()), Some(OpKind::Write));
        assert_eq!(
            OpKind::from_u8(OpKind::Delete.as_u8()),
            Some(OpKind::Delete)
        );
        assert_eq!(OpKind::from_u8(2), None);
    }

    #[test]
    fn test_record_constructors() {
        let w = Record::write(Key::new(1), Bytes::from_static(b"v"));
        assert!(!w.is_tombstone());

        let t = Record::tombstone(Key::new(1));
        assert!(t.is_tombstone());
        assert!(t.value.is_empty());
    }
}
