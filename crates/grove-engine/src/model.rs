//! The key->page model.
//!
//! The engine consumes the model through a narrow trait: map a key to the
//! base page responsible for it, and to the strictly-next base page. The
//! queries must be idempotent under concurrent reorganization: "next page"
//! means the strictly greater *existing* base boundary's page at query time,
//! never a cached successor.
//!
//! [`PageBoundaryModel`] is the provided implementation: an ordered map of
//! page lower boundaries, installed by the bulk loader and swapped
//! atomically by reorganizations. A learned structure can sit behind the
//! same trait without touching the rest of the engine.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use grove_common::types::{Key, PhysicalPageId};
use parking_lot::RwLock;

/// The narrow interface the engine consumes.
pub trait Model: Send + Sync {
    /// Returns the base page responsible for `key`.
    ///
    /// Keys below the smallest boundary clamp to the first page. Returns
    /// [`PhysicalPageId::INVALID`] only when no pages exist at all.
    fn key_to_page_id(&self, key: Key) -> PhysicalPageId;

    /// Returns the page of the smallest base boundary strictly greater than
    /// `key`, or [`PhysicalPageId::INVALID`] past the last page.
    fn key_to_next_page_id(&self, key: Key) -> PhysicalPageId;

    /// Returns the lower bound of the segment containing `key`.
    fn key_to_segment_base(&self, key: Key) -> Key;
}

/// Per-boundary model entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSlot {
    /// The base page that owns the boundary.
    pub page: PhysicalPageId,
    /// Lower bound of the segment the page belongs to.
    pub segment_base: Key,
}

/// Boundary-map implementation of [`Model`].
pub struct PageBoundaryModel {
    boundaries: RwLock<BTreeMap<Key, ModelSlot>>,
}

impl PageBoundaryModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boundaries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the number of page boundaries.
    pub fn num_pages(&self) -> usize {
        self.boundaries.read().len()
    }

    /// Installs the boundaries produced by the bulk loader.
    pub(crate) fn install(&self, entries: Vec<(Key, ModelSlot)>) {
        let mut boundaries = self.boundaries.write();
        debug_assert!(boundaries.is_empty(), "install on a non-empty model");
        boundaries.extend(entries);
    }

    /// Replaces the boundaries at `old_keys` with `new_entries` in one latch
    /// acquisition. Used by segment rewrites; queries before and after the
    /// swap both resolve to live pages.
    pub(crate) fn apply_rewrite(&self, old_keys: &[Key], new_entries: Vec<(Key, ModelSlot)>) {
        let mut boundaries = self.boundaries.write();
        for key in old_keys {
            let removed = boundaries.remove(key);
            debug_assert!(removed.is_some(), "rewrite of a missing boundary");
        }
        boundaries.extend(new_entries);
    }
}

impl Default for PageBoundaryModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for PageBoundaryModel {
    fn key_to_page_id(&self, key: Key) -> PhysicalPageId {
        let boundaries = self.boundaries.read();
        boundaries
            .range(..=key)
            .next_back()
            .or_else(|| boundaries.iter().next())
            .map_or(PhysicalPageId::INVALID, |(_, slot)| slot.page)
    }

    fn key_to_next_page_id(&self, key: Key) -> PhysicalPageId {
        let boundaries = self.boundaries.read();
        boundaries
            .range((Excluded(key), Unbounded))
            .next()
            .map_or(PhysicalPageId::INVALID, |(_, slot)| slot.page)
    }

    fn key_to_segment_base(&self, key: Key) -> Key {
        let boundaries = self.boundaries.read();
        boundaries
            .range(..=key)
            .next_back()
            .or_else(|| boundaries.iter().next())
            .map_or(Key::MIN, |(_, slot)| slot.segment_base)
    }
}

impl std::fmt::Debug for PageBoundaryModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBoundaryModel")
            .field("pages", &self.num_pages())
            .finish()
    }
}
