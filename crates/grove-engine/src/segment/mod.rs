//! Segments: descriptors, the ordered index, and the lock manager.
//!
//! A segment is a contiguous run of physical pages covering one key range.
//! The [`SegmentIndex`] maps each segment's lower bound to its
//! [`SegmentInfo`]; the [`SegmentLockManager`] provides the per-segment
//! Read/Write/Reorg latching that keeps writers, readers-with-locks, and
//! reorganizations apart.

mod index;
mod info;
mod lock;

pub use index::{LockedRegion, SegmentEntry, SegmentIndex};
pub use info::SegmentInfo;
pub use lock::{HeldSegmentLock, SegmentLockManager, SegmentMode};
