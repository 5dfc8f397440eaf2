//! System-wide constants for GroveDB.

// =============================================================================
// Page Constants
// =============================================================================

/// Default page size in bytes (64 KiB).
///
/// Pages are deliberately large: the engine amortizes each page write over
/// many deferred record mutations, so bigger pages trade memory for fewer
/// I/Os.
pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

/// Minimum page size in bytes (4 KiB).
pub const MIN_PAGE_SIZE: usize = 4 * 1024;

/// Maximum page size in bytes (1 MiB).
pub const MAX_PAGE_SIZE: usize = 1024 * 1024;

/// Size of the on-disk page header in bytes.
///
/// Contains: magic (2), flags (1), reserved (1), checksum (4),
/// lower boundary key (8), overflow pointer (8), record count (2),
/// record bytes used (4) = 30 bytes, rounded to 40 for alignment.
pub const PAGE_HEADER_SIZE: usize = 40;

/// Magic number for page header validation.
pub const PAGE_MAGIC: u16 = 0x4756; // "GV" in ASCII

// =============================================================================
// Buffer Pool Constants
// =============================================================================

/// Default number of frames in the buffer pool.
pub const DEFAULT_BUFFER_POOL_FRAMES: usize = 1024;

/// Minimum number of frames the buffer pool will accept.
///
/// A chain fix pins the base page plus every overflow page at once, and a
/// range scan keeps two chains pinned; a tiny pool would deadlock on its own
/// pins.
pub const MIN_BUFFER_POOL_FRAMES: usize = 8;

// =============================================================================
// Flush / Deferral Constants
// =============================================================================

/// Default memtable size that triggers a flush cycle (64 MiB).
pub const DEFAULT_MEMTABLE_FLUSH_THRESHOLD: usize = 64 * 1024 * 1024;

/// Default minimum number of buffered records a page needs before a flush
/// cycle will write it.
pub const DEFAULT_IO_THRESHOLD: usize = 1;

/// Default maximum number of consecutive flush cycles a page may be skipped.
pub const DEFAULT_MAX_DEFERRALS: u64 = 0;

// =============================================================================
// Segment Constants
// =============================================================================

/// Default number of pages grouped into one segment by the bulk loader.
pub const DEFAULT_PAGES_PER_SEGMENT: usize = 16;

/// Default target page utilization used by the bulk loader, in percent.
pub const DEFAULT_PAGE_FILL_PCT: u32 = 50;

/// Default number of adjacent segments examined on each side when choosing a
/// rewrite region.
pub const DEFAULT_REORG_SEARCH_RADIUS: u32 = 2;

/// Default overflow chain length (in pages) that triggers a reorganization.
pub const DEFAULT_REORG_CHAIN_THRESHOLD: usize = 3;

// =============================================================================
// Backoff Constants
// =============================================================================

/// Default saturation exponent for randomized exponential backoff.
///
/// The wait before retry `n` is drawn uniformly from
/// `[0, 2^min(n, saturate))` microseconds.
pub const DEFAULT_BACKOFF_SATURATE: u32 = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_constants() {
        assert!(DEFAULT_PAGE_SIZE.is_power_of_two());
        assert!(MIN_PAGE_SIZE.is_power_of_two());
        assert!(MAX_PAGE_SIZE.is_power_of_two());
        assert!(PAGE_HEADER_SIZE < MIN_PAGE_SIZE);
    }

    #[test]
    fn test_buffer_pool_constants() {
        assert!(MIN_BUFFER_POOL_FRAMES >= 4);
        assert!(DEFAULT_BUFFER_POOL_FRAMES >= MIN_BUFFER_POOL_FRAMES);
    }
}
