//! The segment index.
//!
//! An ordered map from segment lower bound to [`SegmentInfo`], guarded by a
//! reader-writer latch. The index covers `[loader_min, +inf)` without gaps:
//! for any key there is exactly one segment whose range contains it, found
//! as the greatest entry with `lower <= key` (clamped to the first entry for
//! keys below the loaded minimum).
//!
//! Lookup-with-lock never holds the index latch while waiting: it releases
//! the latch between non-blocking lock attempts and absorbs contention with
//! randomized exponential backoff.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use grove_common::error::{GroveError, GroveResult};
use grove_common::types::Key;
use parking_lot::RwLock;
use tracing::debug;

use crate::backoff::RandExpBackoff;

use super::info::SegmentInfo;
use super::lock::{HeldSegmentLock, SegmentLockManager, SegmentMode};

/// A copied-out view of one index entry.
///
/// `upper` is the successor entry's lower bound, or [`Key::MAX`] for the
/// last segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEntry {
    /// The segment's lower bound (inclusive).
    pub lower: Key,
    /// The segment's upper bound (exclusive).
    pub upper: Key,
    /// The segment descriptor.
    pub info: SegmentInfo,
}

/// A rewrite region whose segments are locked in `Reorg` mode.
///
/// Dropping the region releases every reorg lock, so revalidation failures
/// and error paths cannot strand a segment locked.
pub struct LockedRegion {
    entries: Vec<SegmentEntry>,
    locks: Arc<SegmentLockManager>,
}

impl LockedRegion {
    /// Returns the locked entries in ascending lower-bound order.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[SegmentEntry] {
        &self.entries
    }

    /// Returns the region's lower bound.
    #[inline]
    #[must_use]
    pub fn lower(&self) -> Key {
        self.entries.first().expect("region is never empty").lower
    }

    /// Returns the region's exclusive upper bound.
    #[inline]
    #[must_use]
    pub fn upper(&self) -> Key {
        self.entries.last().expect("region is never empty").upper
    }
}

impl Drop for LockedRegion {
    fn drop(&mut self) {
        for entry in &self.entries {
            self.locks.release(entry.info.id(), SegmentMode::Reorg);
        }
    }
}

impl std::fmt::Debug for LockedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedRegion")
            .field("segments", &self.entries.len())
            .field("lower", &self.lower())
            .field("upper", &self.upper())
            .finish()
    }
}

/// Ordered mapping from lower bound to segment, with segment locking.
pub struct SegmentIndex {
    index: RwLock<BTreeMap<Key, SegmentInfo>>,
    locks: Arc<SegmentLockManager>,
    backoff_saturate: u32,
}

impl SegmentIndex {
    /// Creates an empty index backed by the given lock manager.
    #[must_use]
    pub fn new(locks: Arc<SegmentLockManager>, backoff_saturate: u32) -> Self {
        Self {
            index: RwLock::new(BTreeMap::new()),
            locks,
            backoff_saturate,
        }
    }

    /// Returns the segment containing `key`.
    ///
    /// # Panics
    ///
    /// Panics if the index is empty. The loader installs at least one
    /// segment before the engine serves requests.
    pub fn segment_for_key(&self, key: Key) -> SegmentEntry {
        let index = self.index.read();
        Self::entry_for(&index, key)
    }

    /// Returns the segment containing `key` with a segment lock held in
    /// `mode`.
    ///
    /// The lock is taken under the index latch, so the returned entry was
    /// current at the instant the lock was granted. On contention the latch
    /// is released and the attempt repeats after a randomized backoff.
    pub fn segment_for_key_with_lock(
        &self,
        key: Key,
        mode: SegmentMode,
    ) -> (SegmentEntry, HeldSegmentLock) {
        let mut backoff = RandExpBackoff::new(self.backoff_saturate);
        loop {
            {
                let index = self.index.read();
                let entry = Self::entry_for(&index, key);
                if self.locks.try_acquire(entry.info.id(), mode) {
                    let held = HeldSegmentLock::new(Arc::clone(&self.locks), entry.info.id(), mode);
                    return (entry, held);
                }
            }
            backoff.wait();
        }
    }

    /// Returns the first segment whose lower bound is strictly greater than
    /// `key`, or `None` past the last segment.
    pub fn next_segment_for_key(&self, key: Key) -> Option<SegmentEntry> {
        let index = self.index.read();
        let (&lower, _) = index.range((Excluded(key), Unbounded)).next()?;
        Some(Self::entry_at(&index, lower))
    }

    /// Like [`next_segment_for_key`](Self::next_segment_for_key), but with a
    /// segment lock held in `mode`.
    pub fn next_segment_for_key_with_lock(
        &self,
        key: Key,
        mode: SegmentMode,
    ) -> Option<(SegmentEntry, HeldSegmentLock)> {
        let mut backoff = RandExpBackoff::new(self.backoff_saturate);
        loop {
            {
                let index = self.index.read();
                let lower = match index.range((Excluded(key), Unbounded)).next() {
                    Some((&lower, _)) => lower,
                    None => return None,
                };
                let entry = Self::entry_at(&index, lower);
                if self.locks.try_acquire(entry.info.id(), mode) {
                    let held = HeldSegmentLock::new(Arc::clone(&self.locks), entry.info.id(), mode);
                    return Some((entry, held));
                }
            }
            backoff.wait();
        }
    }

    /// Toggles the overflow hint on the segment containing `key`.
    pub fn set_segment_overflow(&self, key: Key, overflow: bool) {
        let mut index = self.index.write();
        let lower = Self::entry_for(&index, key).lower;
        if let Some(info) = index.get_mut(&lower) {
            info.set_overflow(overflow);
        }
    }

    /// Identifies and reorg-locks the group of adjacent segments to rewrite
    /// around `segment_base`.
    ///
    /// Walks backward then forward from the segment at `segment_base`, up to
    /// `search_radius` segments each way, stopping at the first segment
    /// without the overflow hint. The collected segments are locked in
    /// ascending lower-bound order (with backoff), then revalidated: every
    /// collected lower must still name the same segment at consecutive index
    /// positions. Returns `Ok(None)` when revalidation fails; the caller
    /// retries. A `segment_base` that is not a current lower bound is
    /// `InvalidArgument`.
    pub fn find_and_lock_rewrite_region(
        &self,
        segment_base: Key,
        search_radius: u32,
    ) -> GroveResult<Option<LockedRegion>> {
        let mut to_rewrite: Vec<SegmentEntry> = Vec::new();
        {
            let index = self.index.read();
            if !index.contains_key(&segment_base) {
                return Err(GroveError::invalid_argument(format!(
                    "no segment with lower bound {segment_base}"
                )));
            }
            to_rewrite.push(Self::entry_at(&index, segment_base));

            // Scan backward.
            for (&lower, info) in index
                .range(..segment_base)
                .rev()
                .take(search_radius as usize)
            {
                if !info.has_overflow() {
                    break;
                }
                to_rewrite.push(Self::entry_at(&index, lower));
            }

            // Scan forward.
            for (&lower, info) in index
                .range((Excluded(segment_base), Unbounded))
                .take(search_radius as usize)
            {
                if !info.has_overflow() {
                    break;
                }
                to_rewrite.push(Self::entry_at(&index, lower));
            }
        }

        to_rewrite.sort_by_key(|entry| entry.lower);

        // Acquire the reorg locks without holding the index latch; taking
        // them can wait on active readers and writers. Ascending order keeps
        // concurrent reorg groups deadlock free.
        let mut backoff = RandExpBackoff::new(self.backoff_saturate);
        for entry in &to_rewrite {
            backoff.reset();
            while !self.locks.try_acquire(entry.info.id(), SegmentMode::Reorg) {
                backoff.wait();
            }
        }
        let region = LockedRegion {
            entries: to_rewrite,
            locks: Arc::clone(&self.locks),
        };

        // Revalidate: another reorg may have redrawn the boundaries while
        // the locks were being collected. The locked segments must still be
        // consecutive, live entries.
        let still_valid = {
            let index = self.index.read();
            let mut live = index.range(region.lower()..);
            region.entries().iter().all(|entry| {
                matches!(
                    live.next(),
                    Some((&lower, info)) if lower == entry.lower && info.id() == entry.info.id()
                )
            })
        };

        if still_valid {
            Ok(Some(region))
        } else {
            debug!(base = %segment_base, "rewrite region revalidation failed");
            drop(region);
            Ok(None)
        }
    }

    /// Returns the key range `[lower, upper)` of the segment containing
    /// `key`.
    pub fn segment_bounds_for(&self, key: Key) -> (Key, Key) {
        let entry = self.segment_for_key(key);
        (entry.lower, entry.upper)
    }

    /// Approximate memory footprint of the index in bytes.
    pub fn size_footprint(&self) -> usize {
        let index = self.index.read();
        std::mem::size_of::<Self>()
            + index.len()
                * (std::mem::size_of::<Key>() + std::mem::size_of::<SegmentInfo>())
    }

    /// Number of segments in the index.
    pub fn num_entries(&self) -> usize {
        self.index.read().len()
    }

    /// Installs the initial entries produced by the bulk loader.
    pub(crate) fn install(&self, entries: Vec<(Key, SegmentInfo)>) {
        let mut index = self.index.write();
        debug_assert!(index.is_empty(), "install on a non-empty index");
        index.extend(entries);
    }

    /// Replaces the entries at `old_lowers` with `new_entries` in one latch
    /// acquisition. Used by segment rewrites.
    pub(crate) fn apply_rewrite(
        &self,
        old_lowers: &[Key],
        new_entries: Vec<(Key, SegmentInfo)>,
    ) {
        let mut index = self.index.write();
        for lower in old_lowers {
            let removed = index.remove(lower);
            debug_assert!(removed.is_some(), "rewrite of a missing segment");
        }
        index.extend(new_entries);
    }

    /// Greatest entry with `lower <= key`, clamped to the first entry.
    fn entry_for(index: &BTreeMap<Key, SegmentInfo>, key: Key) -> SegmentEntry {
        let lower = index
            .range(..=key)
            .next_back()
            .or_else(|| index.iter().next())
            .map(|(&lower, _)| lower)
            .expect("segment index is empty");
        Self::entry_at(index, lower)
    }

    /// Copies out the entry at `lower`, deriving its upper bound.
    fn entry_at(index: &BTreeMap<Key, SegmentInfo>, lower: Key) -> SegmentEntry {
        let info = index[&lower];
        let upper = index
            .range((Excluded(lower), Unbounded))
            .next()
            .map_or(Key::MAX, |(&next, _)| next);
        SegmentEntry { lower, upper, info }
    }
}

impl std::fmt::Debug for SegmentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentIndex")
            .field("segments", &self.num_entries())
            .finish()
    }
}
