//! Segment reorganization.
//!
//! When a segment's overflow chains grow past the configured threshold, its
//! neighborhood is rewritten in place: the rewrite region is discovered and
//! reorg-locked through the segment index, every live record in the region
//! is collected (later pages win, tombstones compact away), and the records
//! are repacked into fresh segments at the target fill. Old pages are
//! retired, never reclaimed.
//!
//! Visibility ordering matters because readers do not take segment locks:
//! new pages are written first, then the model and index swap to the new
//! layout, and only then are the old pages retired. A model query at any
//! instant resolves to a page that is still fixable; a fix that misses
//! re-queries the model and lands on the new layout.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use grove_common::config::GroveOptions;
use grove_common::error::{GroveError, GroveResult};
use grove_common::types::{Key, PhysicalPageId, Record};
use grove_storage::buffer::BufferManager;
use grove_storage::chain::{fix_overflow_chain, ChainLatchTable, PageMergeIterator};
use tracing::{debug, info};

use crate::backoff::RandExpBackoff;
use crate::loader;
use crate::model::PageBoundaryModel;
use crate::segment::{LockedRegion, SegmentIndex};

/// Everything a rewrite needs a handle on.
pub(crate) struct ReorgContext<'a> {
    pub buffer: &'a BufferManager,
    pub latches: &'a Arc<ChainLatchTable>,
    pub index: &'a SegmentIndex,
    pub model: &'a PageBoundaryModel,
    pub options: &'a GroveOptions,
    pub next_segment_id: &'a AtomicU64,
}

/// Outcome of one rewrite, fed back into flush bookkeeping.
pub(crate) struct ReorgOutcome {
    /// Pages retired by the rewrite.
    pub retired_pages: Vec<PhysicalPageId>,
}

/// Rewrites the region around the segment containing `hint_key`.
///
/// Retries region discovery until revalidation succeeds; a region invalidated
/// by a concurrent rewrite is re-resolved from the current index.
pub(crate) fn reorganize(ctx: &ReorgContext<'_>, hint_key: Key) -> GroveResult<ReorgOutcome> {
    let mut backoff = RandExpBackoff::new(ctx.options.backoff_saturate);
    let region = loop {
        let base = ctx.index.segment_for_key(hint_key).lower;
        match ctx
            .index
            .find_and_lock_rewrite_region(base, ctx.options.reorg_search_radius)
        {
            Ok(Some(region)) => break region,
            // Revalidation failed; boundaries moved underneath us.
            Ok(None) => backoff.wait(),
            // The base itself vanished between the lookup and the region
            // search; resolve it again.
            Err(GroveError::InvalidArgument { .. }) => backoff.wait(),
            Err(e) => return Err(e),
        }
    };

    rewrite_locked_region(ctx, &region)
}

/// Rewrites an already-locked region. The locks are released when `region`
/// drops in the caller.
fn rewrite_locked_region(
    ctx: &ReorgContext<'_>,
    region: &LockedRegion,
) -> GroveResult<ReorgOutcome> {
    let (records, old_boundaries, old_pages) = collect_region(ctx, region)?;

    let layout = loader::write_segments(
        ctx.buffer,
        ctx.options,
        &records,
        region.lower(),
        ctx.next_segment_id,
    )?;

    // Swap the maps: model first, so a writer that already holds a segment
    // lock from the new index can only observe new pages.
    let new_boundaries = layout.boundaries;
    ctx.model.apply_rewrite(&old_boundaries, new_boundaries);

    let old_lowers: Vec<Key> = region.entries().iter().map(|e| e.lower).collect();
    let new_segments = layout.segments;
    let new_count = new_segments.len();
    ctx.index.apply_rewrite(&old_lowers, new_segments);

    // Only now make the old pages unfixable. Scans holding pins on them
    // keep reading their frames until they move on.
    ctx.buffer.retire_pages(&old_pages);

    info!(
        lower = %region.lower(),
        old_segments = region.entries().len(),
        new_segments = new_count,
        records = records.len(),
        "reorganized segment region"
    );

    Ok(ReorgOutcome {
        retired_pages: old_pages,
    })
}

/// Reads every live record in the region, in key order.
///
/// Also returns the model boundary keys and the full set of page ids
/// (overflow pages included) belonging to the region's chains.
fn collect_region(
    ctx: &ReorgContext<'_>,
    region: &LockedRegion,
) -> GroveResult<(Vec<Record>, Vec<Key>, Vec<PhysicalPageId>)> {
    let mut records = Vec::new();
    let mut boundaries = Vec::new();
    let mut pages = Vec::new();

    for entry in region.entries() {
        for page_idx in 0..entry.info.page_count() {
            let base = entry.info.page_at(page_idx);
            // The reorg lock excludes writers and other rewrites, so the
            // chain must still exist.
            let chain = fix_overflow_chain(ctx.buffer, ctx.latches, base, false, false)?
                .ok_or_else(|| {
                    GroveError::corruption(format!("segment page {base} missing under reorg lock"))
                })?;

            boundaries.push(chain.lower_boundary());
            pages.extend(chain.page_ids());

            let mut it = PageMergeIterator::new(&chain, None)?;
            let mut last_key: Option<Key> = None;
            while it.valid() {
                let record = it.record();
                // The first version seen per key is the newest; stale
                // versions and everything shadowed by a tombstone drop out.
                if last_key != Some(record.key) {
                    last_key = Some(record.key);
                    if !record.is_tombstone() {
                        records.push(record.clone());
                    }
                }
                it.next();
            }
        }
    }

    debug!(
        segments = region.entries().len(),
        pages = pages.len(),
        live_records = records.len(),
        "collected rewrite region"
    );

    Ok((records, boundaries, pages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::segment::SegmentLockManager;
    use bytes::Bytes;
    use grove_common::types::OpKind;
    use grove_storage::chain::fix_overflow_chain;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        buffer: BufferManager,
        latches: Arc<ChainLatchTable>,
        index: SegmentIndex,
        model: PageBoundaryModel,
        options: GroveOptions,
        next_segment_id: AtomicU64,
    }

    impl Fixture {
        fn ctx(&self) -> ReorgContext<'_> {
            ReorgContext {
                buffer: &self.buffer,
                latches: &self.latches,
                index: &self.index,
                model: &self.model,
                options: &self.options,
                next_segment_id: &self.next_segment_id,
            }
        }
    }

    /// Loads `records` through the loader and installs index and model.
    fn loaded_fixture(records: Vec<(Key, Bytes)>) -> Fixture {
        let dir = tempdir().unwrap();
        let options = GroveOptions::default()
            .with_page_size(4096)
            .with_page_fill_pct(50)
            .with_pages_per_segment(2)
            .with_buffer_pool_frames(64);
        let buffer = BufferManager::open(
            dir.path().join("data.grove"),
            options.page_size,
            options.buffer_pool_frames,
        )
        .unwrap();
        let next_segment_id = AtomicU64::new(0);
        let layout = loader::bulk_load(&buffer, &options, &records, &next_segment_id).unwrap();

        let index = SegmentIndex::new(Arc::new(SegmentLockManager::new()), 4);
        index.install(layout.segments);
        let model = PageBoundaryModel::new();
        model.install(layout.boundaries);

        Fixture {
            _dir: dir,
            buffer,
            latches: Arc::new(ChainLatchTable::new()),
            index,
            model,
            options,
            next_segment_id,
        }
    }

    fn load_records(n: u64) -> Vec<(Key, Bytes)> {
        (0..n)
            .map(|i| (Key::new(i * 10), Bytes::from(vec![b'v'; 494])))
            .collect()
    }

    fn all_records(f: &Fixture) -> Vec<(u64, usize)> {
        let mut out = Vec::new();
        let mut page = f.model.key_to_page_id(Key::MIN);
        while page.is_valid() {
            let chain = fix_overflow_chain(&f.buffer, &f.latches, page, false, false)
                .unwrap()
                .unwrap();
            let mut it = PageMergeIterator::new(&chain, None).unwrap();
            let mut last = None;
            while it.valid() {
                let r = it.record();
                if last != Some(r.key) {
                    last = Some(r.key);
                    if !r.is_tombstone() {
                        out.push((r.key.as_u64(), r.value.len()));
                    }
                }
                it.next();
            }
            let lower = chain.lower_boundary();
            drop(chain);
            page = f.model.key_to_next_page_id(lower);
        }
        out
    }

    /// Inserts fresh keys `anchor+1 ..= anchor+count` into the chain owning
    /// `anchor`, growing it past the overflow threshold.
    fn grow_chain(f: &Fixture, anchor: Key, count: u64) {
        for i in 1..=count {
            let key = Key::new(anchor.as_u64() + i);
            let page = f.model.key_to_page_id(key);
            let mut chain = fix_overflow_chain(&f.buffer, &f.latches, page, true, false)
                .unwrap()
                .unwrap();
            let record = Record {
                key,
                value: Bytes::from(vec![b'a' + (i % 26) as u8; 900]),
                kind: OpKind::Write,
            };
            chain.apply_batch(&f.buffer, &[record]).unwrap();
            drop(chain);
        }
    }

    #[test]
    fn test_reorganize_preserves_records() {
        let f = loaded_fixture(load_records(12));
        grow_chain(&f, Key::new(0), 8);
        f.index.set_segment_overflow(Key::new(0), true);

        let outcome = reorganize(&f.ctx(), Key::new(0)).unwrap();
        assert!(!outcome.retired_pages.is_empty());

        // Every loaded and inserted key survives, in ascending order.
        let records = all_records(&f);
        assert_eq!(records.len(), 12 + 8);
        assert_eq!(records[0], (0, 494));
        assert_eq!(records[1], (1, 900));
        for window in records.windows(2) {
            assert!(window[0].0 < window[1].0);
        }

        // The index still covers the whole domain.
        assert!(f.index.num_entries() >= 1);
        assert_eq!(f.index.segment_for_key(Key::MIN).lower, Key::new(0));
    }

    #[test]
    fn test_reorganize_retires_old_pages() {
        let f = loaded_fixture(load_records(12));
        grow_chain(&f, Key::new(0), 8);

        let old_page = f.model.key_to_page_id(Key::new(0));
        let outcome = reorganize(&f.ctx(), Key::new(0)).unwrap();

        assert!(outcome.retired_pages.contains(&old_page));
        assert!(fix_overflow_chain(&f.buffer, &f.latches, old_page, false, false)
            .unwrap()
            .is_none());

        // The model resolves to a live replacement page.
        let new_page = f.model.key_to_page_id(Key::new(0));
        assert_ne!(new_page, old_page);
        assert!(f.buffer.is_live(new_page));
    }

    #[test]
    fn test_reorganize_compacts_tombstones() {
        let f = loaded_fixture(load_records(8));

        // Tombstone key 10 directly in its chain.
        let page = f.model.key_to_page_id(Key::new(10));
        let mut chain = fix_overflow_chain(&f.buffer, &f.latches, page, true, false)
            .unwrap()
            .unwrap();
        chain
            .apply_batch(&f.buffer, &[Record::tombstone(Key::new(10))])
            .unwrap();
        drop(chain);

        reorganize(&f.ctx(), Key::new(10)).unwrap();

        let keys: Vec<u64> = all_records(&f).iter().map(|(k, _)| *k).collect();
        assert!(!keys.contains(&10));
        assert_eq!(keys.len(), 7);
    }

    #[test]
    fn test_reorganize_all_deleted_keeps_cover() {
        let f = loaded_fixture(vec![(Key::new(100), Bytes::from_static(b"v"))]);

        let page = f.model.key_to_page_id(Key::new(100));
        let mut chain = fix_overflow_chain(&f.buffer, &f.latches, page, true, false)
            .unwrap()
            .unwrap();
        chain
            .apply_batch(&f.buffer, &[Record::tombstone(Key::new(100))])
            .unwrap();
        drop(chain);

        reorganize(&f.ctx(), Key::new(100)).unwrap();

        // The domain stays covered by one (empty) segment.
        assert_eq!(f.index.num_entries(), 1);
        assert_eq!(f.index.segment_for_key(Key::new(100)).lower, Key::new(100));
        assert!(all_records(&f).is_empty());
    }
}
