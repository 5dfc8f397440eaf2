//! Buffer manager implementation.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use grove_common::error::{GroveError, GroveResult};
use grove_common::types::PhysicalPageId;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::file::DataFile;
use crate::page::PageHeader;

use super::eviction::ClockReplacer;
use super::frame::{BufferFrame, FrameId};
use super::guard::FrameGuard;
use super::BufferStats;

/// The buffer manager.
///
/// Owns the frame array, the page table, the eviction policy, and the data
/// file. All page access goes through [`fix_page`](Self::fix_page); all page
/// creation goes through [`allocate_run`](Self::allocate_run) /
/// [`init_page`](Self::init_page).
pub struct BufferManager {
    page_size: usize,
    frames: Vec<Arc<BufferFrame>>,
    /// Maps resident pages to frames.
    page_table: RwLock<HashMap<PhysicalPageId, FrameId>>,
    replacer: ClockReplacer,
    file: DataFile,
    /// Serializes the miss path: frame claiming, victim write-back, disk
    /// read, and page table insertion.
    alloc_mutex: Mutex<()>,
    /// Next page id to hand out. Ids below this that are not retired are
    /// live.
    next_page: AtomicU64,
    /// Page ids renumbered away by reorganization. Never removed.
    retired: RwLock<HashSet<PhysicalPageId>>,
    fix_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
    writeback_count: AtomicU64,
    shutdown: AtomicBool,
}

impl BufferManager {
    /// Opens a buffer manager over the data file at `path`.
    pub fn open(path: impl AsRef<Path>, page_size: usize, num_frames: usize) -> GroveResult<Self> {
        if num_frames == 0 {
            return Err(GroveError::invalid_config("buffer pool needs >= 1 frame"));
        }

        let frames = (0..num_frames)
            .map(|i| Arc::new(BufferFrame::new(FrameId::new(i), page_size)))
            .collect();

        Ok(Self {
            page_size,
            frames,
            page_table: RwLock::new(HashMap::with_capacity(num_frames)),
            replacer: ClockReplacer::new(num_frames),
            file: DataFile::open(path, page_size)?,
            alloc_mutex: Mutex::new(()),
            next_page: AtomicU64::new(0),
            retired: RwLock::new(HashSet::new()),
            fix_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            writeback_count: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Returns the page size.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of frames.
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if `page_id` has been allocated and not retired.
    pub fn is_live(&self, page_id: PhysicalPageId) -> bool {
        page_id.is_valid()
            && page_id.as_u64() < self.next_page.load(Ordering::Acquire)
            && !self.retired.read().contains(&page_id)
    }

    /// Fixes (pins) a page.
    ///
    /// Returns `Ok(None)` if the page does not exist anymore: either it was
    /// never allocated, or a reorganization has renumbered it. Callers must
    /// treat `None` as "retry via the model". I/O and corruption errors
    /// surface as `Err`.
    pub fn fix_page(
        &self,
        page_id: PhysicalPageId,
        exclusive: bool,
    ) -> GroveResult<Option<FrameGuard>> {
        self.check_shutdown()?;
        self.fix_count.fetch_add(1, Ordering::Relaxed);

        if !self.is_live(page_id) {
            return Ok(None);
        }

        // Fast path: the page is resident.
        loop {
            let frame = {
                let table = self.page_table.read();
                table
                    .get(&page_id)
                    .map(|frame_id| Arc::clone(&self.frames[frame_id.index()]))
            };
            let Some(frame) = frame else { break };

            frame.pin();
            // The frame may have been evicted and reused between the lookup
            // and the pin. Re-check and retry if so.
            if frame.page_id() == page_id {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(FrameGuard::new(frame, page_id, exclusive)));
            }
            frame.unpin();
        }

        // Miss: bring the page in from disk.
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let frame = self.fetch_from_disk(page_id)?;
        Ok(Some(FrameGuard::new(frame, page_id, exclusive)))
    }

    /// Reserves a contiguous run of `count` fresh page ids.
    ///
    /// The pages have no frames and no disk contents yet; each must be
    /// materialized with [`init_page`](Self::init_page) before it can be
    /// fixed.
    pub fn allocate_run(&self, count: u64) -> PhysicalPageId {
        debug_assert!(count > 0);
        let base = self.next_page.fetch_add(count, Ordering::AcqRel);
        trace!(base, count, "allocated page run");
        PhysicalPageId::new(base)
    }

    /// Materializes a freshly allocated page in the pool.
    ///
    /// The frame is zeroed, pinned exclusively, and marked dirty so the page
    /// reaches disk even if the caller writes nothing else. The page id must
    /// come from [`allocate_run`](Self::allocate_run) and must not have been
    /// initialized before.
    pub fn init_page(&self, page_id: PhysicalPageId) -> GroveResult<FrameGuard> {
        self.check_shutdown()?;
        debug_assert!(page_id.as_u64() < self.next_page.load(Ordering::Acquire));

        let _alloc = self.alloc_mutex.lock();
        debug_assert!(
            !self.page_table.read().contains_key(&page_id),
            "init_page on an already-resident page"
        );

        let frame = self.claim_frame()?;
        frame.write_data().fill(0);
        frame.set_page_id(page_id);
        frame.set_dirty();
        frame.pin();
        self.page_table.write().insert(page_id, frame.frame_id());

        Ok(FrameGuard::new(frame, page_id, true))
    }

    /// Allocates and materializes a single page.
    pub fn allocate_page(&self) -> GroveResult<(PhysicalPageId, FrameGuard)> {
        let page_id = self.allocate_run(1);
        let guard = self.init_page(page_id)?;
        Ok((page_id, guard))
    }

    /// Retires a set of pages renumbered away by a reorganization.
    ///
    /// Future fixes of these ids observe `None`. Frames currently pinned on
    /// these pages stay readable until their holders unfix them; page
    /// storage is never reclaimed.
    pub fn retire_pages(&self, page_ids: &[PhysicalPageId]) {
        {
            let mut retired = self.retired.write();
            retired.extend(page_ids.iter().copied());
        }
        {
            let mut table = self.page_table.write();
            for page_id in page_ids {
                table.remove(page_id);
            }
        }
        debug!(count = page_ids.len(), "retired pages");
    }

    /// Writes a page back to disk if it is resident and dirty.
    pub fn flush_page(&self, page_id: PhysicalPageId) -> GroveResult<()> {
        let frame = {
            let table = self.page_table.read();
            table
                .get(&page_id)
                .map(|frame_id| Arc::clone(&self.frames[frame_id.index()]))
        };
        // Not resident means an eviction already wrote it back.
        let Some(frame) = frame else { return Ok(()) };

        if frame.clear_dirty() {
            if let Err(e) = self.write_frame_to_disk(&frame) {
                frame.set_dirty();
                return Err(e);
            }
            self.writeback_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Writes every dirty page back to disk. Returns the number written.
    pub fn flush_all(&self) -> GroveResult<usize> {
        let mut flushed = 0;
        for frame in &self.frames {
            if !frame.is_empty() && frame.clear_dirty() {
                if let Err(e) = self.write_frame_to_disk(frame) {
                    frame.set_dirty();
                    return Err(e);
                }
                flushed += 1;
            }
        }
        self.writeback_count
            .fetch_add(flushed as u64, Ordering::Relaxed);
        self.file.sync()?;
        Ok(flushed)
    }

    /// Returns true if the page is resident in the pool.
    pub fn contains(&self, page_id: PhysicalPageId) -> bool {
        self.page_table.read().contains_key(&page_id)
    }

    /// Returns buffer statistics.
    pub fn stats(&self) -> BufferStats {
        let mut pinned = 0;
        let mut dirty = 0;
        for frame in &self.frames {
            if frame.is_pinned() {
                pinned += 1;
            }
            if frame.is_dirty() {
                dirty += 1;
            }
        }
        BufferStats {
            fixes: self.fix_count.load(Ordering::Relaxed),
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            evictions: self.eviction_count.load(Ordering::Relaxed),
            writebacks: self.writeback_count.load(Ordering::Relaxed),
            pinned_frames: pinned,
            dirty_frames: dirty,
        }
    }

    /// Flushes everything and refuses further fixes.
    pub fn shutdown(&self) -> GroveResult<()> {
        self.shutdown.store(true, Ordering::Release);
        self.flush_all()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn check_shutdown(&self) -> GroveResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            Err(GroveError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Brings a page in from disk. Serialized by the alloc mutex.
    fn fetch_from_disk(&self, page_id: PhysicalPageId) -> GroveResult<Arc<BufferFrame>> {
        let _alloc = self.alloc_mutex.lock();

        // Another thread may have brought the page in while we waited.
        if let Some(&frame_id) = self.page_table.read().get(&page_id) {
            let frame = Arc::clone(&self.frames[frame_id.index()]);
            frame.pin();
            return Ok(frame);
        }

        let frame = self.claim_frame()?;
        {
            let mut data = frame.write_data();
            if let Err(e) = self.file.read_page(page_id, &mut data) {
                drop(data);
                frame.reset();
                return Err(e);
            }
            self.verify_page(page_id, &data)?;
        }
        frame.set_page_id(page_id);
        frame.pin();
        self.page_table.write().insert(page_id, frame.frame_id());
        Ok(frame)
    }

    /// Finds a free frame or evicts a victim. Caller holds the alloc mutex.
    fn claim_frame(&self) -> GroveResult<Arc<BufferFrame>> {
        if let Some(frame_id) = self.replacer.find_free_frame(&self.frames) {
            return Ok(Arc::clone(&self.frames[frame_id.index()]));
        }

        let frame_id = self
            .replacer
            .find_victim(&self.frames)
            .ok_or(GroveError::NoFreeFrames)?;
        let frame = Arc::clone(&self.frames[frame_id.index()]);

        if frame.clear_dirty() {
            if let Err(e) = self.write_frame_to_disk(&frame) {
                frame.set_dirty();
                return Err(e);
            }
            self.writeback_count.fetch_add(1, Ordering::Relaxed);
        }

        let old_page_id = frame.page_id();
        if old_page_id.is_valid() {
            self.page_table.write().remove(&old_page_id);
        }
        frame.reset();
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
        trace!(victim = %old_page_id, "evicted page");

        Ok(frame)
    }

    /// Seals the page checksum and writes the frame's contents to disk.
    fn write_frame_to_disk(&self, frame: &BufferFrame) -> GroveResult<()> {
        let page_id = frame.page_id();
        let mut data = frame.write_data();
        PageHeader::new(&mut data).update_checksum();
        self.file.write_page(page_id, &data)?;
        Ok(())
    }

    /// Validates a page read from disk.
    fn verify_page(&self, page_id: PhysicalPageId, data: &[u8]) -> GroveResult<()> {
        let header = crate::page::PageHeaderRef::new(data);
        if !header.is_valid_magic() {
            return Err(GroveError::corruption(format!(
                "page {page_id} has invalid magic"
            )));
        }
        if !header.verify_checksum() {
            let expected = header.checksum();
            let actual = crate::page::compute_page_checksum(data, crate::page::CHECKSUM_OFFSET);
            return Err(GroveError::ChecksumMismatch {
                page_id,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("num_frames", &self.frames.len())
            .field("page_size", &self.page_size)
            .field("resident", &self.page_table.read().len())
            .field("next_page", &self.next_page.load(Ordering::Relaxed))
            .finish()
    }
}
