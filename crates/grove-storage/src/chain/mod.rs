//! Overflow chains.
//!
//! A base page plus the pages reached by following its overflow pointers
//! form one logical page. [`fix_overflow_chain`] pins the whole chain as a
//! unit; the pins (and the per-chain latch, if kept) are released when the
//! [`OverflowChain`] drops, on every exit path.
//!
//! Records inside a chain are not globally sorted: each page is internally
//! sorted, and later pages hold newer writes. Readers merge the pages with
//! the [`merge::PageMergeIterator`]; writers apply mutations with
//! [`OverflowChain::apply_batch`], which keeps the newer-pages-later rule
//! intact.

mod latch;
mod merge;

pub use latch::{ChainLatchGuard, ChainLatchTable};
pub use merge::PageMergeIterator;

use grove_common::error::{GroveError, GroveResult};
use grove_common::types::{Key, OpKind, PhysicalPageId, Record};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use crate::buffer::{BufferManager, FrameGuard};
use crate::page::{self, PageHeader, PAGE_HEADER_SIZE, RECORD_OVERHEAD};

/// A fully pinned overflow chain.
///
/// Position 0 is the base page; each later frame was reached through its
/// predecessor's overflow pointer.
pub struct OverflowChain {
    frames: Vec<FrameGuard>,
    latch: Option<ChainLatchGuard>,
}

impl OverflowChain {
    /// Returns the number of pages in the chain, base included.
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// A chain always contains its base page.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the base page's id.
    #[inline]
    pub fn base_page(&self) -> PhysicalPageId {
        self.frames[0].page_id()
    }

    /// Returns the chain's lower boundary key (stored on the base page).
    #[inline]
    pub fn lower_boundary(&self) -> Key {
        self.frames[0].lower_boundary()
    }

    /// Returns the pinned frames, base first.
    #[inline]
    pub fn frames(&self) -> &[FrameGuard] {
        &self.frames
    }

    /// Returns the ids of every page in the chain.
    pub fn page_ids(&self) -> Vec<PhysicalPageId> {
        self.frames.iter().map(FrameGuard::page_id).collect()
    }

    /// Releases the per-chain latch early, keeping the pins.
    pub fn release_latch(&mut self) {
        self.latch = None;
    }

    /// Applies a batch of mutations to the chain.
    ///
    /// Records must be sorted by key and must each fit in a page. The chain
    /// must have been fixed exclusively. Placement rules:
    ///
    /// - a write replaces the latest occurrence of its key in place when the
    ///   new encoding fits, otherwise the stale copy is dropped and the new
    ///   version goes into a later page (so later-page-wins stays correct);
    /// - a key with no prior occurrence goes into the first page with room;
    /// - a delete overwrites the latest occurrence with a tombstone, or is
    ///   dropped entirely if the key is absent from the chain;
    /// - when no page has room, a fresh overflow page is allocated and
    ///   linked.
    pub fn apply_batch(
        &mut self,
        manager: &BufferManager,
        records: &[Record],
    ) -> GroveResult<()> {
        debug_assert!(self.frames.iter().all(FrameGuard::is_exclusive));
        debug_assert!(records.windows(2).all(|w| w[0].key <= w[1].key));

        let budget = manager.page_size() - PAGE_HEADER_SIZE;

        // Decode every page into (key -> record) maps; one version per key
        // per page.
        let mut pages: Vec<BTreeMap<Key, Record>> = Vec::with_capacity(self.frames.len());
        let mut sizes: Vec<usize> = Vec::with_capacity(self.frames.len());
        let mut touched: Vec<bool> = vec![false; self.frames.len()];
        for frame in &self.frames {
            let decoded = page::read_records(&frame.data())?;
            let bytes = page::records_byte_len(&decoded);
            pages.push(decoded.into_iter().map(|r| (r.key, r)).collect());
            sizes.push(bytes);
        }

        for record in records {
            if page::encoded_len(record) > budget {
                return Err(GroveError::invalid_argument("record larger than one page"));
            }
            let new_len = page::encoded_len(record);

            // Latest occurrence wins, so search back to front.
            let existing = (0..pages.len())
                .rev()
                .find(|&i| pages[i].contains_key(&record.key));

            match (record.kind, existing) {
                (OpKind::Delete, None) => {
                    // Nothing on disk to shadow; the tombstone is moot.
                    continue;
                }
                (OpKind::Delete, Some(i)) => {
                    // A tombstone never encodes larger than the record it
                    // replaces.
                    let old_len = page::encoded_len(&pages[i][&record.key]);
                    sizes[i] = sizes[i] - old_len + RECORD_OVERHEAD;
                    pages[i].insert(record.key, Record::tombstone(record.key));
                    touched[i] = true;
                }
                (OpKind::Write, Some(i))
                    if sizes[i] - page::encoded_len(&pages[i][&record.key]) + new_len
                        <= budget =>
                {
                    let old_len = page::encoded_len(&pages[i][&record.key]);
                    sizes[i] = sizes[i] - old_len + new_len;
                    pages[i].insert(record.key, record.clone());
                    touched[i] = true;
                }
                (OpKind::Write, existing) => {
                    // Either a fresh key, or an update that no longer fits
                    // where it lives. Drop the stale copy (if any) and place
                    // the new version no earlier than it was.
                    let min_page = match existing {
                        Some(i) => {
                            let old = pages[i].remove(&record.key).unwrap();
                            sizes[i] -= page::encoded_len(&old);
                            touched[i] = true;
                            i
                        }
                        None => 0,
                    };
                    let slot = (min_page..pages.len())
                        .find(|&i| sizes[i] + new_len <= budget);
                    let slot = match slot {
                        Some(i) => i,
                        None => {
                            self.append_overflow_page(manager)?;
                            pages.push(BTreeMap::new());
                            sizes.push(0);
                            touched.push(false);
                            pages.len() - 1
                        }
                    };
                    sizes[slot] += new_len;
                    pages[slot].insert(record.key, record.clone());
                    touched[slot] = true;
                }
            }
        }

        // Re-encode the pages that changed.
        for (i, page_records) in pages.iter().enumerate() {
            if !touched[i] {
                continue;
            }
            let sorted: Vec<Record> = page_records.values().cloned().collect();
            page::write_records(&mut self.frames[i].data_mut(), &sorted)?;
        }

        Ok(())
    }

    /// Allocates a fresh overflow page and links it at the end of the chain.
    fn append_overflow_page(&mut self, manager: &BufferManager) -> GroveResult<()> {
        let lower = self.lower_boundary();
        let (page_id, mut guard) = manager.allocate_page()?;
        PageHeader::new(&mut guard.data_mut()).initialize(lower);

        let last = self.frames.last_mut().expect("chain is never empty");
        PageHeader::new(&mut last.data_mut()).set_overflow(page_id);

        trace!(base = %self.base_page(), overflow = %page_id, "appended overflow page");
        self.frames.push(guard);
        Ok(())
    }
}

impl std::fmt::Debug for OverflowChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverflowChain")
            .field("base", &self.base_page())
            .field("pages", &self.len())
            .field("latched", &self.latch.is_some())
            .finish()
    }
}

/// Fixes a whole overflow chain.
///
/// Fixes the base page, then every overflow page it points to, in order.
/// Returns `Ok(None)` iff the base page could not be fixed (a reorganization
/// has renumbered it); a dangling overflow pointer inside the chain is
/// corruption, since overflow pages are only ever retired together with
/// their base.
///
/// The per-chain latch is held during the walk. With `keep_latched` the
/// returned chain retains it, for callers that do more chain bookkeeping
/// before letting other writers in; otherwise it is released before
/// returning.
pub fn fix_overflow_chain(
    manager: &BufferManager,
    latches: &Arc<ChainLatchTable>,
    base: PhysicalPageId,
    exclusive: bool,
    keep_latched: bool,
) -> GroveResult<Option<OverflowChain>> {
    let latch = latches.acquire(base);

    let Some(base_guard) = manager.fix_page(base, exclusive)? else {
        return Ok(None);
    };

    let mut frames = vec![base_guard];
    loop {
        let next = frames.last().unwrap().overflow();
        if !next.is_valid() {
            break;
        }
        let Some(guard) = manager.fix_page(next, exclusive)? else {
            return Err(GroveError::corruption(format!(
                "overflow pointer to missing page {next}"
            )));
        };
        frames.push(guard);
    }

    Ok(Some(OverflowChain {
        frames,
        latch: keep_latched.then_some(latch),
    }))
}
