//! Segment lock manager.
//!
//! A per-segment three-mode latch. Compatibility:
//!
//! ```text
//!  held \ requested │ Read │ Write │ Reorg │
//! ──────────────────┼──────┼───────┼───────┤
//!  Read             │  ✓   │   ✗   │   ✗   │
//!  Write            │  ✗   │   ✗   │   ✗   │
//!  Reorg            │  ✗   │   ✗   │   ✗   │
//! ```
//!
//! Acquisition is non-blocking: callers drive their own randomized
//! exponential backoff so that the segment index latch is never held across
//! a wait. Deadlock freedom among reorganizations comes from the callers'
//! ordering rule (reorg locks are acquired in ascending lower-bound order),
//! not from anything in here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use grove_common::types::SegmentId;
use parking_lot::Mutex;
use std::sync::Arc;

/// Number of shards in the lock table.
const LOCK_SHARDS: usize = 16;

/// Lock mode for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentMode {
    /// Shared access for readers that must exclude writers.
    Read,
    /// Exclusive access for one chain writer.
    Write,
    /// Exclusive access for a segment rewrite.
    Reorg,
}

impl std::fmt::Display for SegmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentMode::Read => write!(f, "R"),
            SegmentMode::Write => write!(f, "W"),
            SegmentMode::Reorg => write!(f, "O"),
        }
    }
}

/// State of one segment's latch.
#[derive(Debug, Default)]
struct LockState {
    readers: u32,
    writer: bool,
    reorg: bool,
}

impl LockState {
    fn can_grant(&self, mode: SegmentMode) -> bool {
        match mode {
            SegmentMode::Read => !self.writer && !self.reorg,
            SegmentMode::Write | SegmentMode::Reorg => {
                self.readers == 0 && !self.writer && !self.reorg
            }
        }
    }

    fn grant(&mut self, mode: SegmentMode) {
        match mode {
            SegmentMode::Read => self.readers += 1,
            SegmentMode::Write => self.writer = true,
            SegmentMode::Reorg => self.reorg = true,
        }
    }

    fn release(&mut self, mode: SegmentMode) {
        match mode {
            SegmentMode::Read => {
                debug_assert!(self.readers > 0, "released a Read lock not held");
                self.readers -= 1;
            }
            SegmentMode::Write => {
                debug_assert!(self.writer, "released a Write lock not held");
                self.writer = false;
            }
            SegmentMode::Reorg => {
                debug_assert!(self.reorg, "released a Reorg lock not held");
                self.reorg = false;
            }
        }
    }

    fn is_free(&self) -> bool {
        self.readers == 0 && !self.writer && !self.reorg
    }
}

/// Per-segment lock manager.
pub struct SegmentLockManager {
    shards: Vec<Mutex<HashMap<SegmentId, LockState>>>,
    acquisitions: AtomicU64,
    rejections: AtomicU64,
    releases: AtomicU64,
}

impl SegmentLockManager {
    /// Creates an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..LOCK_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            acquisitions: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, id: SegmentId) -> &Mutex<HashMap<SegmentId, LockState>> {
        &self.shards[(id.as_u64() as usize) % LOCK_SHARDS]
    }

    /// Tries to acquire a segment lock. Never blocks.
    pub fn try_acquire(&self, id: SegmentId, mode: SegmentMode) -> bool {
        let mut shard = self.shard(id).lock();
        let state = shard.entry(id).or_default();
        if state.can_grant(mode) {
            state.grant(mode);
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Releases a segment lock. The mode must match the acquisition.
    pub fn release(&self, id: SegmentId, mode: SegmentMode) {
        let mut shard = self.shard(id).lock();
        if let Some(state) = shard.get_mut(&id) {
            state.release(mode);
            if state.is_free() {
                shard.remove(&id);
            }
            self.releases.fetch_add(1, Ordering::Relaxed);
        } else {
            debug_assert!(false, "released a lock on an unlocked segment");
        }
    }

    /// Returns true if any mode is currently held on the segment.
    pub fn is_locked(&self, id: SegmentId) -> bool {
        self.shard(id).lock().contains_key(&id)
    }

    /// Total successful acquisitions.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Total rejected (contended) acquisition attempts.
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

impl Default for SegmentLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SegmentLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentLockManager")
            .field("acquisitions", &self.acquisitions())
            .field("rejections", &self.rejections())
            .finish()
    }
}

/// RAII holder for one acquired segment lock.
///
/// Releases the lock on drop, so error paths cannot leak it.
pub struct HeldSegmentLock {
    manager: Arc<SegmentLockManager>,
    id: SegmentId,
    mode: SegmentMode,
}

impl HeldSegmentLock {
    /// Wraps an already-acquired lock.
    pub(crate) fn new(manager: Arc<SegmentLockManager>, id: SegmentId, mode: SegmentMode) -> Self {
        Self { manager, id, mode }
    }

    /// Returns the locked segment's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Returns the held mode.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> SegmentMode {
        self.mode
    }
}

impl Drop for HeldSegmentLock {
    fn drop(&mut self) {
        self.manager.release(self.id, self.mode);
    }
}

impl std::fmt::Debug for HeldSegmentLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldSegmentLock")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .finish()
    }
}
