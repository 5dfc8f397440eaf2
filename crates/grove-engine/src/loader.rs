//! Bulk loading.
//!
//! The loader turns a sorted record set into the initial on-disk layout:
//! records are packed into pages at the configured fill percentage, pages
//! are grouped into segments, each segment's page run is allocated
//! contiguously, and every page is initialized with its lower boundary and
//! written through to disk. The same packing and writing path is reused by
//! segment rewrites.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use grove_common::config::GroveOptions;
use grove_common::error::{GroveError, GroveResult};
use grove_common::types::{Key, Record, SegmentId};
use grove_storage::buffer::BufferManager;
use grove_storage::page::{self, PageHeader};
use tracing::debug;

use crate::model::ModelSlot;
use crate::segment::SegmentInfo;

/// The index entries and model boundaries for a freshly written layout.
pub(crate) struct WrittenLayout {
    pub segments: Vec<(Key, SegmentInfo)>,
    pub boundaries: Vec<(Key, ModelSlot)>,
}

/// Splits records into per-page runs, each within the loader's byte budget.
///
/// Every page holds at least one record regardless of budget, so oversized
/// records still land somewhere (their chains will overflow on the first
/// update instead).
pub(crate) fn pack_pages(records: &[Record], page_budget: usize) -> Vec<Vec<Record>> {
    let mut pages: Vec<Vec<Record>> = Vec::new();
    let mut current: Vec<Record> = Vec::new();
    let mut current_bytes = 0usize;

    for record in records {
        let len = page::encoded_len(record);
        if !current.is_empty() && current_bytes + len > page_budget {
            pages.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += len;
        current.push(record.clone());
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

/// Writes `records` as a fresh run of segments.
///
/// `anchor_lower` becomes the first page's lower boundary when it is smaller
/// than the first record's key, so a rewrite keeps covering the exact key
/// range of the segments it replaces. Handles an empty record set by
/// emitting one empty page anchored at `anchor_lower`.
pub(crate) fn write_segments(
    buffer: &BufferManager,
    options: &GroveOptions,
    records: &[Record],
    anchor_lower: Key,
    next_segment_id: &AtomicU64,
) -> GroveResult<WrittenLayout> {
    let budget = options.loader_page_budget();

    let mut page_runs = pack_pages(records, budget);
    if page_runs.is_empty() {
        page_runs.push(Vec::new());
    }

    let mut segments = Vec::new();
    let mut boundaries = Vec::new();

    for (chunk_idx, chunk) in page_runs.chunks(options.pages_per_segment).enumerate() {
        let base_page = buffer.allocate_run(chunk.len() as u64);
        let segment_id = SegmentId::new(next_segment_id.fetch_add(1, Ordering::AcqRel));

        let first_key = |page_records: &[Record], fallback: Key| {
            page_records.first().map_or(fallback, |r| r.key)
        };

        let segment_lower = {
            let lower = first_key(&chunk[0], anchor_lower);
            if chunk_idx == 0 {
                lower.min(anchor_lower)
            } else {
                lower
            }
        };

        for (i, page_records) in chunk.iter().enumerate() {
            let page_id = base_page.offset(i as u64);
            let lower = if i == 0 {
                segment_lower
            } else {
                first_key(page_records, segment_lower)
            };

            let mut guard = buffer.init_page(page_id)?;
            {
                let mut data = guard.data_mut();
                PageHeader::new(&mut data).initialize(lower);
                page::write_records(&mut data, page_records)?;
            }
            drop(guard);
            buffer.flush_page(page_id)?;

            boundaries.push((
                lower,
                ModelSlot {
                    page: page_id,
                    segment_base: segment_lower,
                },
            ));
        }

        segments.push((
            segment_lower,
            SegmentInfo::new(segment_id, base_page, chunk.len() as u32),
        ));
    }

    debug!(
        segments = segments.len(),
        pages = boundaries.len(),
        records = records.len(),
        "wrote segment layout"
    );

    Ok(WrittenLayout {
        segments,
        boundaries,
    })
}

/// Bulk loads a sorted key-value set into an empty store.
///
/// Keys must be strictly increasing; anything else is `InvalidArgument`.
pub(crate) fn bulk_load(
    buffer: &BufferManager,
    options: &GroveOptions,
    records: &[(Key, Bytes)],
    next_segment_id: &AtomicU64,
) -> GroveResult<WrittenLayout> {
    if records.is_empty() {
        return Err(GroveError::invalid_argument(
            "cannot bulk load an empty record set",
        ));
    }
    if !records.windows(2).all(|w| w[0].0 < w[1].0) {
        return Err(GroveError::invalid_argument(
            "bulk load records must be sorted by strictly increasing key",
        ));
    }

    let writes: Vec<Record> = records
        .iter()
        .map(|(key, value)| Record::write(*key, value.clone()))
        .collect();

    write_segments(buffer, options, &writes, records[0].0, next_segment_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_common::types::PhysicalPageId;
    use tempfile::tempdir;

    fn tiny_options() -> GroveOptions {
        GroveOptions::default()
            .with_page_size(4096)
            .with_page_fill_pct(50)
            .with_pages_per_segment(2)
            .with_buffer_pool_frames(64)
    }

    fn record(key: u64, len: usize) -> Record {
        Record::write(Key::new(key), Bytes::from(vec![b'x'; len]))
    }

    #[test]
    fn test_pack_respects_budget() {
        let records: Vec<Record> = (0..10).map(|i| record(i, 100)).collect();
        let pages = pack_pages(&records, 300);

        assert!(pages.len() > 1);
        for page_records in &pages {
            assert!(page::records_byte_len(page_records) <= 300);
        }
        let total: usize = pages.iter().map(Vec::len).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_pack_oversized_record_gets_own_page() {
        let records = vec![record(1, 1000), record(2, 10)];
        let pages = pack_pages(&records, 100);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].len(), 1);
    }

    #[test]
    fn test_bulk_load_layout() {
        let dir = tempdir().unwrap();
        let options = tiny_options();
        let buffer = BufferManager::open(
            dir.path().join("data.grove"),
            options.page_size,
            options.buffer_pool_frames,
        )
        .unwrap();
        let next_segment_id = AtomicU64::new(0);

        // 12 records of ~500 bytes at a ~2 KiB budget: 4 records per page,
        // 3 pages, 2 segments (2 pages + 1 page).
        let records: Vec<(Key, Bytes)> = (0..12)
            .map(|i| (Key::new(i * 10), Bytes::from(vec![b'v'; 494])))
            .collect();
        let layout = bulk_load(&buffer, &options, &records, &next_segment_id).unwrap();

        assert_eq!(layout.boundaries.len(), 3);
        assert_eq!(layout.segments.len(), 2);
        assert_eq!(layout.segments[0].0, Key::new(0));

        // Segment page runs are contiguous.
        for (_, info) in &layout.segments {
            assert!(info.page_count() >= 1);
        }
        let (_, first_info) = &layout.segments[0];
        assert_eq!(first_info.base_page(), PhysicalPageId::new(0));
        assert_eq!(first_info.page_count(), 2);

        // Pages are written through and carry their boundaries.
        for (lower, slot) in &layout.boundaries {
            let guard = buffer.fix_page(slot.page, false).unwrap().unwrap();
            assert_eq!(guard.lower_boundary(), *lower);
        }
    }

    #[test]
    fn test_bulk_load_rejects_unsorted() {
        let dir = tempdir().unwrap();
        let options = tiny_options();
        let buffer = BufferManager::open(
            dir.path().join("data.grove"),
            options.page_size,
            options.buffer_pool_frames,
        )
        .unwrap();
        let next_segment_id = AtomicU64::new(0);

        let records = vec![
            (Key::new(10), Bytes::from_static(b"a")),
            (Key::new(5), Bytes::from_static(b"b")),
        ];
        assert!(matches!(
            bulk_load(&buffer, &options, &records, &next_segment_id),
            Err(GroveError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_bulk_load_rejects_empty() {
        let dir = tempdir().unwrap();
        let options = tiny_options();
        let buffer = BufferManager::open(
            dir.path().join("data.grove"),
            options.page_size,
            options.buffer_pool_frames,
        )
        .unwrap();
        let next_segment_id = AtomicU64::new(0);

        assert!(matches!(
            bulk_load(&buffer, &options, &[], &next_segment_id),
            Err(GroveError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_write_segments_empty_records_keeps_cover() {
        let dir = tempdir().unwrap();
        let options = tiny_options();
        let buffer = BufferManager::open(
            dir.path().join("data.grove"),
            options.page_size,
            options.buffer_pool_frames,
        )
        .unwrap();
        let next_segment_id = AtomicU64::new(0);

        let layout =
            write_segments(&buffer, &options, &[], Key::new(500), &next_segment_id).unwrap();
        assert_eq!(layout.segments.len(), 1);
        assert_eq!(layout.segments[0].0, Key::new(500));
        assert_eq!(layout.boundaries.len(), 1);
    }

    #[test]
    fn test_anchor_extends_first_boundary() {
        let dir = tempdir().unwrap();
        let options = tiny_options();
        let buffer = BufferManager::open(
            dir.path().join("data.grove"),
            options.page_size,
            options.buffer_pool_frames,
        )
        .unwrap();
        let next_segment_id = AtomicU64::new(0);

        let records = vec![record(100, 10)];
        let layout =
            write_segments(&buffer, &options, &records, Key::new(40), &next_segment_id).unwrap();
        // The rewritten layout keeps covering keys from the anchor down.
        assert_eq!(layout.segments[0].0, Key::new(40));
        assert_eq!(layout.boundaries[0].0, Key::new(40));
    }
}
