//! Buffer frame: a slot in the pool that holds one page.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use grove_common::types::PhysicalPageId;
use parking_lot::RwLock;

/// Frame identifier: index into the buffer manager's frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub usize);

impl FrameId {
    /// Creates a new frame ID.
    #[inline]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A buffer frame holds one page in memory.
///
/// The pin count is the frame's reference count: a pinned frame is never
/// evicted and its contents stay readable even after the page id it holds
/// has been retired by a reorganization. The dirty bit OR-accumulates across
/// unfixes and is cleared only by write-back.
pub struct BufferFrame {
    frame_id: FrameId,
    /// Page contents.
    data: RwLock<Vec<u8>>,
    /// Page currently held (INVALID if empty).
    page_id: AtomicU64,
    /// Number of active fixes.
    pin_count: AtomicU32,
    /// Modified since the last write-back.
    dirty: AtomicBool,
    /// Reference bit for clock eviction.
    ref_bit: AtomicBool,
}

impl BufferFrame {
    /// Creates a new empty frame.
    pub fn new(frame_id: FrameId, page_size: usize) -> Self {
        Self {
            frame_id,
            data: RwLock::new(vec![0u8; page_size]),
            page_id: AtomicU64::new(PhysicalPageId::INVALID.as_u64()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            ref_bit: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page held by this frame.
    #[inline]
    pub fn page_id(&self) -> PhysicalPageId {
        PhysicalPageId::new(self.page_id.load(Ordering::Acquire))
    }

    /// Assigns a page to this frame.
    #[inline]
    pub fn set_page_id(&self, page_id: PhysicalPageId) {
        self.page_id.store(page_id.as_u64(), Ordering::Release);
    }

    /// Returns true if no page is assigned.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.page_id().is_valid()
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and sets the reference bit.
    #[inline]
    pub fn pin(&self) -> u32 {
        let count = self.pin_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.ref_bit.store(true, Ordering::Release);
        count
    }

    /// Decrements the pin count.
    ///
    /// # Panics
    ///
    /// Debug-panics if the pin count is already 0.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned a frame with pin_count == 0");
        old - 1
    }

    /// Returns true if the frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the frame holds unwritten modifications.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Marks the frame dirty.
    #[inline]
    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty bit, returning whether it was set.
    #[inline]
    pub fn clear_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Returns the clock reference bit.
    #[inline]
    pub fn ref_bit(&self) -> bool {
        self.ref_bit.load(Ordering::Acquire)
    }

    /// Clears the clock reference bit.
    #[inline]
    pub fn clear_ref_bit(&self) {
        self.ref_bit.store(false, Ordering::Release);
    }

    /// Returns a read lock on the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    /// Returns a write lock on the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write()
    }

    /// Returns the frame to the empty state.
    pub fn reset(&self) {
        self.page_id
            .store(PhysicalPageId::INVALID.as_u64(), Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.ref_bit.store(false, Ordering::Release);
    }

    /// A frame can be evicted if it holds a page and nobody has it pinned.
    #[inline]
    pub fn is_evictable(&self) -> bool {
        !self.is_pinned() && !self.is_empty()
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_is_empty() {
        let frame = BufferFrame::new(FrameId::new(0), 4096);
        assert!(frame.is_empty());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(!frame.is_evictable());
    }

    #[test]
    fn test_pin_unpin() {
        let frame = BufferFrame::new(FrameId::new(0), 4096);

        assert_eq!(frame.pin(), 1);
        assert!(frame.ref_bit());
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), 1);
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_dirty_accumulates() {
        let frame = BufferFrame::new(FrameId::new(0), 4096);
        frame.set_dirty();
        frame.set_dirty();
        assert!(frame.is_dirty());
        assert!(frame.clear_dirty());
        assert!(!frame.clear_dirty());
    }

    #[test]
    fn test_evictable() {
        let frame = BufferFrame::new(FrameId::new(0), 4096);
        frame.set_page_id(PhysicalPageId::new(1));
        assert!(frame.is_evictable());

        frame.pin();
        assert!(!frame.is_evictable());
        frame.unpin();
        assert!(frame.is_evictable());
    }

    #[test]
    fn test_reset() {
        let frame = BufferFrame::new(FrameId::new(0), 4096);
        frame.set_page_id(PhysicalPageId::new(1));
        frame.set_dirty();
        frame.reset();
        assert!(frame.is_empty());
        assert!(!frame.is_dirty());
        assert!(!frame.ref_bit());
    }

    #[test]
    fn test_data_access() {
        let frame = BufferFrame::new(FrameId::new(0), 4096);
        frame.write_data()[0..3].copy_from_slice(&[9, 8, 7]);
        assert_eq!(&frame.read_data()[0..3], &[9, 8, 7]);
    }
}
