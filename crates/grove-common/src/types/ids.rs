//! Identifier types for GroveDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical page identifier.
///
/// Identifies one fixed-size page in the data file. Page ids are handed out
/// monotonically and are never reused; a reorganization retires the old ids
/// of a rewritten region and allocates fresh ones, so a `PhysicalPageId` is
/// *not* stable across reorganizations. Callers that cache a page id must be
/// prepared for a fix to fail and re-query the model.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PhysicalPageId(u64);

impl PhysicalPageId {
    /// Invalid page ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(u64::MAX);

    /// First valid page ID.
    pub const FIRST: Self = Self(0);

    /// Creates a new `PhysicalPageId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the page id offset by `delta` pages.
    #[inline]
    #[must_use]
    pub const fn offset(self, delta: u64) -> Self {
        Self(self.0.saturating_add(delta))
    }

    /// Checks if this is a valid page ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Creates a page id from bytes (little-endian, on-disk order).
    #[inline]
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Converts to bytes (little-endian, on-disk order).
    #[inline]
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for PhysicalPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PhysicalPageId(INVALID)")
        } else {
            write!(f, "PhysicalPageId({})", self.0)
        }
    }
}

impl fmt::Display for PhysicalPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PhysicalPageId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<PhysicalPageId> for u64 {
    #[inline]
    fn from(id: PhysicalPageId) -> Self {
        id.0
    }
}

/// Segment identifier.
///
/// Identifies one segment, a contiguous run of pages serving a key range.
/// Segment ids are assigned monotonically by the loader and by rewrites and
/// are the granularity at which the segment lock manager operates.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SegmentId(u64);

impl SegmentId {
    /// Invalid segment ID, used as a sentinel value.
    pub const INVALID: Self = Self(u64::MAX);

    /// Creates a new `SegmentId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid segment ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "SegmentId(INVALID)")
        } else {
            write!(f, "SegmentId({})", self.0)
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SegmentId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<SegmentId> for u64 {
    #[inline]
    fn from(id: SegmentId) -> Self {
        id.0
    }
}
