//! The public engine surface.
//!
//! [`GroveDb`] wires the memtable, flush planner, segment index, lock
//! manager, model, and buffer manager together behind `get` / `put` /
//! `delete` / `get_range`.
//!
//! Concurrency shape: writers are serialized by one mutex (the flush swap is
//! the atomic handover point); readers go through the memtable's
//! reader-writer lock and pinned chains, and never take segment locks. A
//! scan keeps either its previous or current chain pinned at all times, so
//! a concurrent reorganization can never strand it: the pinned chain's
//! lower boundary stays resolvable through the model.

use std::collections::{BTreeMap, BTreeSet};
use std::iter::Peekable;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use grove_common::config::GroveOptions;
use grove_common::error::{GroveError, GroveResult};
use grove_common::types::{Key, OpKind, Record};
use grove_storage::buffer::{BufferManager, BufferStats};
use grove_storage::chain::{fix_overflow_chain, ChainLatchTable, OverflowChain, PageMergeIterator};
use grove_storage::page::{PAGE_HEADER_SIZE, RECORD_OVERHEAD};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::flush::FlushPlanner;
use crate::loader;
use crate::memtable::{MemValue, Memtable};
use crate::model::{Model, PageBoundaryModel};
use crate::reorg::{self, ReorgContext};
use crate::segment::{SegmentIndex, SegmentLockManager, SegmentMode};

/// Engine statistics snapshot.
#[derive(Debug, Clone)]
pub struct GroveStats {
    /// Completed flush cycles.
    pub flush_cycles: u64,
    /// Materialized page writes across all flush cycles.
    pub page_writes: u64,
    /// Page-cycles in which pending records were deferred.
    pub deferrals: u64,
    /// Segments currently in the index.
    pub segments: usize,
    /// Pages currently known to the model.
    pub model_pages: usize,
    /// Approximate bytes held by the active memtable.
    pub memtable_bytes: usize,
    /// Buffer manager counters.
    pub buffer: BufferStats,
}

/// An embedded, single-node, ordered key-value store over page-grouped
/// storage.
pub struct GroveDb {
    options: GroveOptions,
    buffer: Arc<BufferManager>,
    chain_latches: Arc<ChainLatchTable>,
    index: SegmentIndex,
    model: PageBoundaryModel,
    memtable: RwLock<Memtable>,
    /// Serializes put/delete/flush; owns the flush bookkeeping.
    writer: Mutex<FlushPlanner>,
    next_segment_id: AtomicU64,
    shutdown: AtomicBool,
}

impl GroveDb {
    /// Creates a store at `path` and bulk loads `records` (strictly
    /// increasing keys) as the initial layout.
    pub fn create(
        path: impl AsRef<Path>,
        options: GroveOptions,
        records: &[(Key, Bytes)],
    ) -> GroveResult<Self> {
        options.validate()?;

        let buffer = Arc::new(BufferManager::open(
            path,
            options.page_size,
            options.buffer_pool_frames,
        )?);
        let next_segment_id = AtomicU64::new(0);
        let layout = loader::bulk_load(&buffer, &options, records, &next_segment_id)?;

        let index = SegmentIndex::new(
            Arc::new(SegmentLockManager::new()),
            options.backoff_saturate,
        );
        index.install(layout.segments);
        let model = PageBoundaryModel::new();
        model.install(layout.boundaries);

        let planner = FlushPlanner::new(options.io_threshold, options.max_deferrals);

        Ok(Self {
            options,
            buffer,
            chain_latches: Arc::new(ChainLatchTable::new()),
            index,
            model,
            memtable: RwLock::new(Memtable::new()),
            writer: Mutex::new(planner),
            next_segment_id,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Looks up `key`.
    pub fn get(&self, key: Key) -> GroveResult<Bytes> {
        self.check_shutdown()?;

        // The memtable holds the newest version, tombstones included.
        {
            let memtable = self.memtable.read();
            if let Some(entry) = memtable.get(key) {
                return match entry.kind {
                    OpKind::Write => Ok(entry.value.clone()),
                    OpKind::Delete => Err(GroveError::KeyNotFound),
                };
            }
        }

        // On disk: find the chain through the model, retrying when a
        // reorganization renumbers the page between query and fix.
        loop {
            let page = self.model.key_to_page_id(key);
            if !page.is_valid() {
                return Err(GroveError::KeyNotFound);
            }
            let Some(chain) =
                fix_overflow_chain(&self.buffer, &self.chain_latches, page, false, false)?
            else {
                continue;
            };

            let it = PageMergeIterator::new(&chain, Some(key))?;
            if it.valid() && it.key() == key {
                let record = it.record();
                return if record.is_tombstone() {
                    Err(GroveError::KeyNotFound)
                } else {
                    Ok(record.value.clone())
                };
            }
            return Err(GroveError::KeyNotFound);
        }
    }

    /// Inserts or updates `key`.
    pub fn put(&self, key: Key, value: Bytes) -> GroveResult<()> {
        if RECORD_OVERHEAD + value.len() > self.options.page_size - PAGE_HEADER_SIZE {
            return Err(GroveError::invalid_argument(
                "value does not fit in one page",
            ));
        }
        self.write(key, value, OpKind::Write)
    }

    /// Deletes `key`. Deletions are flushed as tombstones.
    pub fn delete(&self, key: Key) -> GroveResult<()> {
        self.write(key, Bytes::new(), OpKind::Delete)
    }

    fn write(&self, key: Key, value: Bytes, kind: OpKind) -> GroveResult<()> {
        self.check_shutdown()?;
        let mut planner = self.writer.lock();

        self.memtable.write().add(key, value, kind);
        planner.note_write(self.model.key_to_page_id(key));

        let usage = self.memtable.read().approximate_memory_usage();
        if usage >= self.options.memtable_flush_threshold {
            self.flush_locked(&mut planner)?;
        }
        Ok(())
    }

    /// Forces a flush cycle.
    pub fn flush(&self) -> GroveResult<()> {
        self.check_shutdown()?;
        let mut planner = self.writer.lock();
        self.flush_locked(&mut planner)
    }

    /// Returns up to `num_records` records with key >= `start_key`, in
    /// ascending key order.
    ///
    /// The scan is per-chain consistent: within one chain the view is a
    /// snapshot, while a reorganization may commit between chains. At all
    /// times either the previous or the current chain stays pinned, so the
    /// model can always be re-anchored by a still-live boundary key.
    pub fn get_range(&self, start_key: Key, num_records: usize) -> GroveResult<Vec<(Key, Bytes)>> {
        self.check_shutdown()?;
        let mut results: Vec<(Key, Bytes)> = Vec::with_capacity(num_records.min(1024));

        // Snapshot the live memtable view for the scanned range; the newest
        // version per key wins and shadows the chains.
        let overlay: BTreeMap<Key, MemValue> = {
            let memtable = self.memtable.read();
            let mut map = BTreeMap::new();
            for (key, _seq, value) in memtable.iter_from(start_key) {
                map.insert(key, value.clone());
            }
            map
        };
        let mut overlay_iter = overlay.into_iter().peekable();

        let mut curr_chain: Option<OverflowChain> = None;
        let mut curr_page = self.model.key_to_page_id(start_key);
        let mut is_first_chain = true;
        // Keys at or below this watermark were already handled. Within a
        // chain this skips the stale versions behind the newest one; across
        // chains it keeps the scan strictly ascending even when a reorg
        // redraws page boundaries behind the scan position.
        let mut last_seen: Option<Key> = None;

        'chains: while results.len() < num_records && curr_page.is_valid() {
            // Keep the previously fixed chain pinned until the next chain is
            // fixed; otherwise it could be reorganized away beneath us and
            // with it the boundary key we navigate by.
            let prev_chain = curr_chain.take();

            while curr_page.is_valid() {
                match fix_overflow_chain(
                    &self.buffer,
                    &self.chain_latches,
                    curr_page,
                    false,
                    false,
                )? {
                    Some(chain) => {
                        curr_chain = Some(chain);
                        break;
                    }
                    None => {
                        // Renumbered by a reorg; query the model again,
                        // anchored on the pinned previous chain's boundary.
                        curr_page = if is_first_chain {
                            self.model.key_to_page_id(start_key)
                        } else {
                            let prev =
                                prev_chain.as_ref().expect("previous chain stays pinned");
                            self.model.key_to_next_page_id(prev.lower_boundary())
                        };
                    }
                }
            }

            // The next chain is fixed (or the scan is over); the previous
            // one can finally be unpinned.
            drop(prev_chain);
            let Some(chain) = curr_chain.as_ref() else { break };

            let mut it =
                PageMergeIterator::new(chain, is_first_chain.then_some(start_key))?;
            is_first_chain = false;

            while it.valid() {
                if results.len() >= num_records {
                    break 'chains;
                }
                let record = it.record();
                let key = record.key;
                if matches!(last_seen, Some(seen) if key <= seen) {
                    it.next();
                    continue;
                }
                last_seen = Some(key);

                Self::drain_overlay_below(&mut overlay_iter, key, &mut results, num_records);
                if results.len() >= num_records {
                    break 'chains;
                }

                let overlay_shadows = matches!(overlay_iter.peek(), Some((k, _)) if *k == key);
                if overlay_shadows {
                    let (okey, oval) = overlay_iter.next().expect("peeked entry");
                    if !oval.kind.is_tombstone() {
                        results.push((okey, oval.value));
                    }
                } else if !record.is_tombstone() {
                    results.push((key, record.value.clone()));
                }
                it.next();
            }

            curr_page = self.model.key_to_next_page_id(chain.lower_boundary());
        }

        // The chains are exhausted; whatever is left in the overlay sorts
        // after every chain record seen.
        while results.len() < num_records {
            match overlay_iter.next() {
                Some((key, value)) if !value.kind.is_tombstone() => {
                    results.push((key, value.value));
                }
                Some(_) => {}
                None => break,
            }
        }

        drop(curr_chain);
        Ok(results)
    }

    /// Drains and emits overlay entries with keys strictly below `bound`.
    fn drain_overlay_below(
        overlay: &mut Peekable<impl Iterator<Item = (Key, MemValue)>>,
        bound: Key,
        results: &mut Vec<(Key, Bytes)>,
        num_records: usize,
    ) {
        while results.len() < num_records {
            match overlay.peek() {
                Some((key, _)) if *key < bound => {
                    let (key, value) = overlay.next().expect("peeked entry");
                    if !value.kind.is_tombstone() {
                        results.push((key, value.value));
                    }
                }
                _ => break,
            }
        }
    }

    /// Flushes everything and refuses further operations.
    ///
    /// The final pass writes every page with pending records
    /// unconditionally, then writes the buffer pool back.
    pub fn shutdown(&self) -> GroveResult<()> {
        self.shutdown.store(true, Ordering::Release);
        let mut planner = self.writer.lock();

        let staged = {
            let memtable = self.memtable.read();
            self.stage_all(&memtable)
        };
        let mut flushed = Vec::with_capacity(staged.len());
        let mut pending_reorg = BTreeSet::new();
        for (page_raw, batch) in &staged {
            self.write_page_batch(batch, &mut pending_reorg)?;
            flushed.push(*page_raw);
        }
        *self.memtable.write() = Memtable::new();
        planner.end_cycle(&flushed);

        self.buffer.shutdown()?;
        Ok(())
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> GroveStats {
        let planner = self.writer.lock();
        GroveStats {
            flush_cycles: planner.flush_cycles(),
            page_writes: planner.page_writes(),
            deferrals: planner.deferrals(),
            segments: self.index.num_entries(),
            model_pages: self.model.num_pages(),
            memtable_bytes: self.memtable.read().approximate_memory_usage(),
            buffer: self.buffer.stats(),
        }
    }

    /// Returns the segment index, for introspection.
    pub fn segment_index(&self) -> &SegmentIndex {
        &self.index
    }

    // -------------------------------------------------------------------------
    // Flush machinery
    // -------------------------------------------------------------------------

    /// Runs one flush cycle. Caller holds the writer mutex.
    fn flush_locked(&self, planner: &mut FlushPlanner) -> GroveResult<()> {
        // Partition the active memtable: entries whose page must be written
        // now are staged; the rest re-enter through the backup memtable.
        let mut staged: BTreeMap<u64, BTreeMap<Key, Record>> = BTreeMap::new();
        let mut backup = Memtable::new();
        {
            let memtable = self.memtable.read();
            if memtable.is_empty() {
                return Ok(());
            }
            for (key, _seq, entry) in memtable.iter() {
                let page = self.model.key_to_page_id(key);
                if planner.should_flush(page) {
                    let record = match entry.kind {
                        OpKind::Write => Record::write(key, entry.value.clone()),
                        OpKind::Delete => Record::tombstone(key),
                    };
                    // Later seqs overwrite: only the newest version of a key
                    // reaches the page.
                    staged.entry(page.as_u64()).or_default().insert(key, record);
                } else {
                    backup.add(key, entry.value.clone(), entry.kind);
                }
            }
        }

        // Materialize the staged pages. The old memtable stays readable
        // until the writes land, so reads never fall into a gap.
        let mut flushed = Vec::with_capacity(staged.len());
        let mut pending_reorg: BTreeSet<Key> = BTreeSet::new();
        for (page_raw, batch) in &staged {
            self.write_page_batch(batch, &mut pending_reorg)?;
            flushed.push(*page_raw);
        }

        // Swap: promote the backup to active, dropping the old memtable.
        *self.memtable.write() = backup;
        planner.end_cycle(&flushed);
        debug!(
            pages = flushed.len(),
            deferred_entries = self.memtable.read().len(),
            "flush cycle complete"
        );

        // Chains that grew past the threshold get their segments rewritten.
        for base in pending_reorg {
            let outcome = reorg::reorganize(&self.reorg_ctx(), base)?;
            planner.forget_pages(&outcome.retired_pages);
        }
        Ok(())
    }

    /// Writes one staged batch into its chain(s), under segment write locks.
    fn write_page_batch(
        &self,
        batch: &BTreeMap<Key, Record>,
        pending_reorg: &mut BTreeSet<Key>,
    ) -> GroveResult<()> {
        let records: Vec<Record> = batch.values().cloned().collect();
        let mut rest: &[Record] = &records;

        while !rest.is_empty() {
            let first_key = rest[0].key;
            let (entry, _lock) = self
                .index
                .segment_for_key_with_lock(first_key, SegmentMode::Write);

            let page = self.model.key_to_page_id(first_key);
            if !page.is_valid() {
                return Err(GroveError::corruption("model lost the page space"));
            }
            // Keep the chain latch across the write and the bookkeeping
            // reads below.
            let Some(mut chain) =
                fix_overflow_chain(&self.buffer, &self.chain_latches, page, true, true)?
            else {
                // Renumbered between the model query and the fix; the
                // segment lock drops here and the next round resolves the
                // fresh layout.
                continue;
            };

            // The batch was grouped under an older model reading; write the
            // prefix that still belongs to this page.
            let span = rest
                .iter()
                .take_while(|r| self.model.key_to_page_id(r.key) == page)
                .count();
            debug_assert!(span > 0, "first record must map to its own page");

            chain.apply_batch(&self.buffer, &rest[..span])?;
            let chain_len = chain.len();
            let page_ids = chain.page_ids();
            chain.release_latch();
            drop(chain);

            // One materialized write per touched page.
            for id in &page_ids {
                self.buffer.flush_page(*id)?;
            }

            if chain_len > 1 {
                self.index.set_segment_overflow(first_key, true);
                if chain_len >= self.options.reorg_chain_threshold {
                    pending_reorg.insert(entry.lower);
                }
            }
            rest = &rest[span..];
        }
        Ok(())
    }

    /// Groups every memtable entry by its current page, newest version per
    /// key. Used by the shutdown pass.
    fn stage_all(&self, memtable: &Memtable) -> BTreeMap<u64, BTreeMap<Key, Record>> {
        let mut staged: BTreeMap<u64, BTreeMap<Key, Record>> = BTreeMap::new();
        for (key, _seq, entry) in memtable.iter() {
            let page = self.model.key_to_page_id(key);
            if !page.is_valid() {
                continue;
            }
            let record = match entry.kind {
                OpKind::Write => Record::write(key, entry.value.clone()),
                OpKind::Delete => Record::tombstone(key),
            };
            staged.entry(page.as_u64()).or_default().insert(key, record);
        }
        staged
    }

    fn reorg_ctx(&self) -> ReorgContext<'_> {
        ReorgContext {
            buffer: &self.buffer,
            latches: &self.chain_latches,
            index: &self.index,
            model: &self.model,
            options: &self.options,
            next_segment_id: &self.next_segment_id,
        }
    }

    fn check_shutdown(&self) -> GroveResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            Err(GroveError::ShuttingDown)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for GroveDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroveDb")
            .field("segments", &self.index.num_entries())
            .field("model_pages", &self.model.num_pages())
            .field("memtable", &*self.memtable.read())
            .finish()
    }
}
