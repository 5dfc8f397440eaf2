//! Per-chain latches.
//!
//! One logical latch per base page id, keyed through a shared table.
//! Chain-structure changes (appending an overflow page, relinking pointers)
//! happen under this latch so that two writers never grow the same chain
//! concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use grove_common::types::PhysicalPageId;
use parking_lot::{Condvar, Mutex};

/// Table of held per-chain latches.
pub struct ChainLatchTable {
    held: Mutex<HashSet<PhysicalPageId>>,
    available: Condvar,
}

impl ChainLatchTable {
    /// Creates an empty latch table.
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            available: Condvar::new(),
        }
    }

    /// Acquires the latch for `base`, blocking while another holder has it.
    pub fn acquire(self: &Arc<Self>, base: PhysicalPageId) -> ChainLatchGuard {
        let mut held = self.held.lock();
        while held.contains(&base) {
            self.available.wait(&mut held);
        }
        held.insert(base);
        ChainLatchGuard {
            table: Arc::clone(self),
            base,
        }
    }

    /// Returns true if the latch for `base` is currently held.
    pub fn is_held(&self, base: PhysicalPageId) -> bool {
        self.held.lock().contains(&base)
    }

    fn release(&self, base: PhysicalPageId) {
        let mut held = self.held.lock();
        let removed = held.remove(&base);
        debug_assert!(removed, "released a chain latch that was not held");
        drop(held);
        self.available.notify_all();
    }
}

impl Default for ChainLatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChainLatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainLatchTable")
            .field("held", &self.held.lock().len())
            .finish()
    }
}

/// RAII guard for one held chain latch.
pub struct ChainLatchGuard {
    table: Arc<ChainLatchTable>,
    base: PhysicalPageId,
}

impl ChainLatchGuard {
    /// Returns the base page this latch covers.
    #[inline]
    pub fn base(&self) -> PhysicalPageId {
        self.base
    }
}

impl Drop for ChainLatchGuard {
    fn drop(&mut self) {
        self.table.release(self.base);
    }
}

impl std::fmt::Debug for ChainLatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainLatchGuard")
            .field("base", &self.base)
            .finish()
    }
}
