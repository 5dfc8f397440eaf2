//! Flush bookkeeping for the deferred-I/O policy.
//!
//! The planner keeps two dense per-page vectors, indexed by raw page id
//! (page ids are monotone and never reused, so the vectors only grow):
//!
//! - `entries_for_page[p]`: memtable records currently destined for page
//!   `p`, incremented on every put or delete. Deferral re-inserts do *not*
//!   increment: the counter persists across cycles until the page actually
//!   flushes.
//! - `deferral_count[p]`: consecutive flush cycles in which `p` was not
//!   written.
//!
//! A flush cycle writes page `p` iff `entries_for_page[p] >= io_threshold`
//! or `deferral_count[p] >= max_deferrals`. Writing a page with few pending
//! records wastes an I/O; skipping one forever starves reads through the
//! backup memtable. `max_deferrals` bounds the staleness.

use grove_common::types::PhysicalPageId;

/// Per-page flush bookkeeping and policy.
pub struct FlushPlanner {
    entries_for_page: Vec<usize>,
    deferral_count: Vec<u64>,
    io_threshold: usize,
    max_deferrals: u64,
    flush_cycles: u64,
    page_writes: u64,
    deferrals: u64,
}

impl FlushPlanner {
    /// Creates a planner with the given policy knobs.
    #[must_use]
    pub fn new(io_threshold: usize, max_deferrals: u64) -> Self {
        Self {
            entries_for_page: Vec::new(),
            deferral_count: Vec::new(),
            io_threshold,
            max_deferrals,
            flush_cycles: 0,
            page_writes: 0,
            deferrals: 0,
        }
    }

    #[inline]
    fn ensure_page(&mut self, page: usize) {
        if page >= self.entries_for_page.len() {
            self.entries_for_page.resize(page + 1, 0);
            self.deferral_count.resize(page + 1, 0);
        }
    }

    /// Records that a fresh mutation is destined for `page`.
    pub fn note_write(&mut self, page: PhysicalPageId) {
        if !page.is_valid() {
            return;
        }
        let page = page.as_u64() as usize;
        self.ensure_page(page);
        self.entries_for_page[page] += 1;
    }

    /// Returns the number of pending records destined for `page`.
    #[must_use]
    pub fn entries_for(&self, page: PhysicalPageId) -> usize {
        self.entries_for_page
            .get(page.as_u64() as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the consecutive deferral count for `page`.
    #[must_use]
    pub fn deferrals_for(&self, page: PhysicalPageId) -> u64 {
        self.deferral_count
            .get(page.as_u64() as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Decides whether the current cycle must write `page`.
    #[must_use]
    pub fn should_flush(&mut self, page: PhysicalPageId) -> bool {
        let page = page.as_u64() as usize;
        self.ensure_page(page);
        self.entries_for_page[page] >= self.io_threshold
            || self.deferral_count[page] >= self.max_deferrals
    }

    /// Closes a flush cycle.
    ///
    /// `flushed` holds the raw ids of pages written this round; their
    /// counters reset. Every other known page's deferral count is bumped.
    pub fn end_cycle(&mut self, flushed: &[u64]) {
        self.flush_cycles += 1;
        self.page_writes += flushed.len() as u64;

        let mut was_flushed = vec![false; self.entries_for_page.len()];
        for &page in flushed {
            let page = page as usize;
            self.ensure_page(page);
            if page >= was_flushed.len() {
                was_flushed.resize(page + 1, false);
            }
            was_flushed[page] = true;
        }

        for page in 0..self.entries_for_page.len() {
            if was_flushed.get(page).copied().unwrap_or(false) {
                self.entries_for_page[page] = 0;
                self.deferral_count[page] = 0;
            } else {
                self.deferral_count[page] += 1;
                if self.entries_for_page[page] > 0 {
                    self.deferrals += 1;
                }
            }
        }
    }

    /// Forgets everything about the given pages. Used after a rewrite
    /// retires them; their successors start with clean counters.
    pub fn forget_pages(&mut self, pages: &[PhysicalPageId]) {
        for page in pages {
            let page = page.as_u64() as usize;
            if page < self.entries_for_page.len() {
                self.entries_for_page[page] = 0;
                self.deferral_count[page] = 0;
            }
        }
    }

    /// Number of completed flush cycles.
    #[inline]
    #[must_use]
    pub fn flush_cycles(&self) -> u64 {
        self.flush_cycles
    }

    /// Number of materialized page writes across all cycles.
    #[inline]
    #[must_use]
    pub fn page_writes(&self) -> u64 {
        self.page_writes
    }

    /// Number of page-cycles in which pending records were deferred.
    #[inline]
    #[must_use]
    pub fn deferrals(&self) -> u64 {
        self.deferrals
    }
}

impl std::fmt::Debug for FlushPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushPlanner")
            .field("pages", &self.entries_for_page.len())
            .field("flush_cycles", &self.flush_cycles)
            .field("page_writes", &self.page_writes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: u64) -> PhysicalPageId {
        PhysicalPageId::new(id)
    }

    #[test]
    fn test_io_threshold_forces_flush() {
        let mut planner = FlushPlanner::new(3, 100);

        planner.note_write(page(0));
        planner.note_write(page(0));
        assert!(!planner.should_flush(page(0)));

        planner.note_write(page(0));
        assert!(planner.should_flush(page(0)));
    }

    #[test]
    fn test_deferral_bound_forces_flush() {
        let mut planner = FlushPlanner::new(3, 2);
        planner.note_write(page(0));

        // Two cycles defer the page.
        assert!(!planner.should_flush(page(0)));
        planner.end_cycle(&[]);
        assert!(!planner.should_flush(page(0)));
        planner.end_cycle(&[]);

        // The third cycle must write it: deferral_count reached the bound.
        assert_eq!(planner.deferrals_for(page(0)), 2);
        assert!(planner.should_flush(page(0)));
    }

    #[test]
    fn test_flush_resets_counters() {
        let mut planner = FlushPlanner::new(1, 0);
        planner.note_write(page(0));
        planner.note_write(page(0));

        assert!(planner.should_flush(page(0)));
        planner.end_cycle(&[0]);

        assert_eq!(planner.entries_for(page(0)), 0);
        assert_eq!(planner.deferrals_for(page(0)), 0);
    }

    #[test]
    fn test_counters_persist_across_deferred_cycles() {
        let mut planner = FlushPlanner::new(10, 100);
        planner.note_write(page(2));
        planner.end_cycle(&[]);

        // The deferred entry still counts toward the next cycle's decision.
        assert_eq!(planner.entries_for(page(2)), 1);
        planner.note_write(page(2));
        assert_eq!(planner.entries_for(page(2)), 2);
    }

    #[test]
    fn test_max_deferrals_zero_always_flushes() {
        let mut planner = FlushPlanner::new(100, 0);
        planner.note_write(page(0));
        assert!(planner.should_flush(page(0)));
    }

    #[test]
    fn test_forget_pages() {
        let mut planner = FlushPlanner::new(1, 0);
        planner.note_write(page(3));
        planner.forget_pages(&[page(3)]);
        assert_eq!(planner.entries_for(page(3)), 0);
    }

    #[test]
    fn test_stats() {
        let mut planner = FlushPlanner::new(1, 100);
        planner.note_write(page(0));
        planner.note_write(page(1));
        planner.end_cycle(&[0, 1]);
        assert_eq!(planner.flush_cycles(), 1);
        assert_eq!(planner.page_writes(), 2);
    }
}
