//! Configuration for GroveDB.

use crate::constants::{
    DEFAULT_BACKOFF_SATURATE, DEFAULT_BUFFER_POOL_FRAMES, DEFAULT_IO_THRESHOLD,
    DEFAULT_MAX_DEFERRALS, DEFAULT_MEMTABLE_FLUSH_THRESHOLD, DEFAULT_PAGES_PER_SEGMENT,
    DEFAULT_PAGE_FILL_PCT, DEFAULT_PAGE_SIZE, DEFAULT_REORG_CHAIN_THRESHOLD,
    DEFAULT_REORG_SEARCH_RADIUS, MAX_PAGE_SIZE, MIN_BUFFER_POOL_FRAMES, MIN_PAGE_SIZE,
    PAGE_HEADER_SIZE,
};
use crate::error::{GroveError, GroveResult};

/// Engine configuration.
///
/// # Example
///
/// ```rust
/// use grove_common::GroveOptions;
///
/// let options = GroveOptions::default()
///     .with_page_size(16 * 1024)
///     .with_io_threshold(3)
///     .with_max_deferrals(2);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct GroveOptions {
    /// Byte size of a physical page.
    pub page_size: usize,
    /// Target page utilization used by the bulk loader, in percent (1..=100).
    pub page_fill_pct: u32,
    /// Memtable byte size that triggers a flush cycle.
    pub memtable_flush_threshold: usize,
    /// Minimum number of buffered records a page needs for a flush cycle to
    /// write it.
    pub io_threshold: usize,
    /// Maximum number of consecutive flush cycles a page may be deferred.
    pub max_deferrals: u64,
    /// Number of adjacent segments examined on each side when choosing a
    /// rewrite region.
    pub reorg_search_radius: u32,
    /// Cap on the exponential backoff exponent.
    pub backoff_saturate: u32,
    /// Number of frames in the buffer pool.
    pub buffer_pool_frames: usize,
    /// Number of pages the bulk loader groups into one segment.
    pub pages_per_segment: usize,
    /// Overflow chain length (in pages, base included) that triggers a
    /// reorganization of the owning segment.
    pub reorg_chain_threshold: usize,
}

impl GroveOptions {
    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the loader's target page fill percentage.
    #[must_use]
    pub fn with_page_fill_pct(mut self, pct: u32) -> Self {
        self.page_fill_pct = pct;
        self
    }

    /// Sets the memtable flush threshold in bytes.
    #[must_use]
    pub fn with_memtable_flush_threshold(mut self, bytes: usize) -> Self {
        self.memtable_flush_threshold = bytes;
        self
    }

    /// Sets the per-page I/O threshold.
    #[must_use]
    pub fn with_io_threshold(mut self, records: usize) -> Self {
        self.io_threshold = records;
        self
    }

    /// Sets the maximum number of consecutive deferrals per page.
    #[must_use]
    pub fn with_max_deferrals(mut self, deferrals: u64) -> Self {
        self.max_deferrals = deferrals;
        self
    }

    /// Sets the rewrite-region search radius.
    #[must_use]
    pub fn with_reorg_search_radius(mut self, radius: u32) -> Self {
        self.reorg_search_radius = radius;
        self
    }

    /// Sets the backoff saturation exponent.
    #[must_use]
    pub fn with_backoff_saturate(mut self, saturate: u32) -> Self {
        self.backoff_saturate = saturate;
        self
    }

    /// Sets the buffer pool size in frames.
    #[must_use]
    pub fn with_buffer_pool_frames(mut self, frames: usize) -> Self {
        self.buffer_pool_frames = frames;
        self
    }

    /// Sets the number of pages per segment used by the bulk loader.
    #[must_use]
    pub fn with_pages_per_segment(mut self, pages: usize) -> Self {
        self.pages_per_segment = pages;
        self
    }

    /// Sets the chain length that triggers a reorganization.
    #[must_use]
    pub fn with_reorg_chain_threshold(mut self, pages: usize) -> Self {
        self.reorg_chain_threshold = pages;
        self
    }

    /// Returns the number of page bytes usable for records.
    #[inline]
    #[must_use]
    pub fn usable_page_bytes(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }

    /// Returns the record byte budget the loader targets per page.
    #[inline]
    #[must_use]
    pub fn loader_page_budget(&self) -> usize {
        self.usable_page_bytes() * self.page_fill_pct as usize / 100
    }

    /// Validates the configuration.
    pub fn validate(&self) -> GroveResult<()> {
        if !self.page_size.is_power_of_two() {
            return Err(GroveError::invalid_config("page_size must be a power of 2"));
        }
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(GroveError::invalid_config(format!(
                "page_size must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
            )));
        }
        if self.page_fill_pct == 0 || self.page_fill_pct > 100 {
            return Err(GroveError::invalid_config(
                "page_fill_pct must be in 1..=100",
            ));
        }
        if self.memtable_flush_threshold == 0 {
            return Err(GroveError::invalid_config(
                "memtable_flush_threshold must be > 0",
            ));
        }
        if self.io_threshold == 0 {
            return Err(GroveError::invalid_config("io_threshold must be > 0"));
        }
        if self.buffer_pool_frames < MIN_BUFFER_POOL_FRAMES {
            return Err(GroveError::invalid_config(format!(
                "buffer_pool_frames must be >= {MIN_BUFFER_POOL_FRAMES}"
            )));
        }
        if self.pages_per_segment == 0 {
            return Err(GroveError::invalid_config("pages_per_segment must be > 0"));
        }
        if self.reorg_chain_threshold < 2 {
            return Err(GroveError::invalid_config(
                "reorg_chain_threshold must be >= 2",
            ));
        }
        Ok(())
    }
}

impl Default for GroveOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_fill_pct: DEFAULT_PAGE_FILL_PCT,
            memtable_flush_threshold: DEFAULT_MEMTABLE_FLUSH_THRESHOLD,
            io_threshold: DEFAULT_IO_THRESHOLD,
            max_deferrals: DEFAULT_MAX_DEFERRALS,
            reorg_search_radius: DEFAULT_REORG_SEARCH_RADIUS,
            backoff_saturate: DEFAULT_BACKOFF_SATURATE,
            buffer_pool_frames: DEFAULT_BUFFER_POOL_FRAMES,
            pages_per_segment: DEFAULT_PAGES_PER_SEGMENT,
            reorg_chain_threshold: DEFAULT_REORG_CHAIN_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(GroveOptions::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let options = GroveOptions::default()
            .with_page_size(16 * 1024)
            .with_page_fill_pct(70)
            .with_io_threshold(3)
            .with_max_deferrals(2)
            .with_reorg_search_radius(4)
            .with_backoff_saturate(10)
            .with_buffer_pool_frames(64)
            .with_pages_per_segment(8)
            .with_reorg_chain_threshold(4);

        assert_eq!(options.page_size, 16 * 1024);
        assert_eq!(options.page_fill_pct, 70);
        assert_eq!(options.io_threshold, 3);
        assert_eq!(options.max_deferrals, 2);
        assert_eq!(options.reorg_search_radius, 4);
        assert_eq!(options.backoff_saturate, 10);
        assert_eq!(options.buffer_pool_frames, 64);
        assert_eq!(options.pages_per_segment, 8);
        assert_eq!(options.reorg_chain_threshold, 4);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_invalid_page_size() {
        let options = GroveOptions::default().with_page_size(5000);
        assert!(options.validate().is_err());

        let options = GroveOptions::default().with_page_size(2048);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_invalid_fill_pct() {
        assert!(GroveOptions::default()
            .with_page_fill_pct(0)
            .validate()
            .is_err());
        assert!(GroveOptions::default()
            .with_page_fill_pct(101)
            .validate()
            .is_err());
    }

    #[test]
    fn test_loader_page_budget() {
        let options = GroveOptions::default()
            .with_page_size(4096)
            .with_page_fill_pct(50);
        assert_eq!(options.loader_page_budget(), options.usable_page_bytes() / 2);
    }
}
