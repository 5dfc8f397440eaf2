//! RAII fix guards.
//!
//! A [`FrameGuard`] represents one fix of one page. Dropping the guard
//! unfixes the page: the pin is released on every exit path, normal or
//! error, and the dirty flag recorded on the guard is OR-ed onto the frame.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use grove_common::types::{Key, PhysicalPageId};

use crate::page::PageHeaderRef;

use super::frame::BufferFrame;

/// A pinned page.
///
/// Created by [`BufferManager::fix_page`](super::BufferManager::fix_page)
/// and friends. Shared fixes may only read the page; an exclusive fix grants
/// mutation through [`data_mut`](FrameGuard::data_mut), which also marks the
/// guard dirty.
pub struct FrameGuard {
    frame: Arc<BufferFrame>,
    page_id: PhysicalPageId,
    exclusive: bool,
    dirty: bool,
}

impl FrameGuard {
    /// Creates a guard over an already-pinned frame.
    pub(crate) fn new(frame: Arc<BufferFrame>, page_id: PhysicalPageId, exclusive: bool) -> Self {
        debug_assert!(frame.is_pinned());
        Self {
            frame,
            page_id,
            exclusive,
            dirty: false,
        }
    }

    /// Returns the page this guard pins.
    #[inline]
    pub fn page_id(&self) -> PhysicalPageId {
        self.page_id
    }

    /// Returns true if this fix grants mutation rights.
    #[inline]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns a read view of the page bytes.
    #[inline]
    pub fn data(&self) -> impl Deref<Target = [u8]> + '_ {
        PageData {
            guard: self.frame.read_data(),
        }
    }

    /// Returns a mutable view of the page bytes and marks the guard dirty.
    ///
    /// # Panics
    ///
    /// Panics if the page was fixed shared.
    #[inline]
    pub fn data_mut(&mut self) -> impl DerefMut<Target = [u8]> + '_ {
        assert!(self.exclusive, "mutating a page fixed shared");
        self.dirty = true;
        PageDataMut {
            guard: self.frame.write_data(),
        }
    }

    /// Records that the page was modified without touching the bytes.
    #[inline]
    pub fn mark_dirty(&mut self) {
        assert!(self.exclusive, "dirtying a page fixed shared");
        self.dirty = true;
    }

    /// Returns the page's lower boundary key.
    #[inline]
    pub fn lower_boundary(&self) -> Key {
        PageHeaderRef::new(&self.data()).lower_boundary()
    }

    /// Returns the page's overflow pointer.
    #[inline]
    pub fn overflow(&self) -> PhysicalPageId {
        PageHeaderRef::new(&self.data()).overflow()
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.dirty {
            self.frame.set_dirty();
        }
        self.frame.unpin();
    }
}

impl std::fmt::Debug for FrameGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGuard")
            .field("page_id", &self.page_id)
            .field("exclusive", &self.exclusive)
            .field("dirty", &self.dirty)
            .finish()
    }
}

struct PageData<'a> {
    guard: parking_lot::RwLockReadGuard<'a, Vec<u8>>,
}

impl Deref for PageData<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

struct PageDataMut<'a> {
    guard: parking_lot::RwLockWriteGuard<'a, Vec<u8>>,
}

impl Deref for PageDataMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for PageDataMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::super::frame::FrameId;
    use super::*;
    use crate::page::PageHeader;

    fn pinned_frame() -> Arc<BufferFrame> {
        let frame = Arc::new(BufferFrame::new(FrameId::new(0), 4096));
        frame.set_page_id(PhysicalPageId::new(7));
        frame.pin();
        frame
    }

    #[test]
    fn test_drop_releases_pin() {
        let frame = pinned_frame();
        {
            let _guard = FrameGuard::new(Arc::clone(&frame), PhysicalPageId::new(7), false);
            assert_eq!(frame.pin_count(), 1);
        }
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_dirty_propagates_on_drop() {
        let frame = pinned_frame();
        {
            let mut guard = FrameGuard::new(Arc::clone(&frame), PhysicalPageId::new(7), true);
            guard.data_mut()[100] = 1;
        }
        assert!(frame.is_dirty());
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    #[should_panic(expected = "mutating a page fixed shared")]
    fn test_shared_guard_rejects_mutation() {
        let frame = pinned_frame();
        let mut guard = FrameGuard::new(frame, PhysicalPageId::new(7), false);
        let _ = guard.data_mut();
    }

    #[test]
    fn test_header_accessors() {
        let frame = pinned_frame();
        {
            let mut data = frame.write_data();
            let mut header = PageHeader::new(&mut data);
            header.initialize(Key::new(123));
            header.set_overflow(PhysicalPageId::new(9));
        }

        let guard = FrameGuard::new(frame, PhysicalPageId::new(7), false);
        assert_eq!(guard.lower_boundary(), Key::new(123));
        assert_eq!(guard.overflow(), PhysicalPageId::new(9));
    }
}
