//! The in-memory write stage.
//!
//! An ordered multiset of `(key, seq)` entries. Entries are never updated in
//! place: a later `add` for the same key shadows earlier ones on read,
//! tombstones included. Iteration yields key-then-seq order, which is what
//! the flush controller walks.

use std::collections::BTreeMap;

use bytes::Bytes;
use grove_common::types::{Key, OpKind};

/// Fixed per-entry bookkeeping overhead counted toward memory usage.
const ENTRY_OVERHEAD: usize = 32;

/// One memtable entry's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemValue {
    /// The value bytes. Empty for tombstones.
    pub value: Bytes,
    /// Write or delete.
    pub kind: OpKind,
}

/// Ordered multiset of pending mutations.
pub struct Memtable {
    entries: BTreeMap<(Key, u64), MemValue>,
    next_seq: u64,
    mem_usage: usize,
}

impl Memtable {
    /// Creates an empty memtable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
            mem_usage: 0,
        }
    }

    /// Appends a mutation. Returns the sequence number assigned to it.
    pub fn add(&mut self, key: Key, value: Bytes, kind: OpKind) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.mem_usage += ENTRY_OVERHEAD + value.len();
        self.entries.insert((key, seq), MemValue { value, kind });
        seq
    }

    /// Returns the latest entry for `key`, if any.
    ///
    /// The caller decides what a tombstone means; it is returned like any
    /// other entry.
    pub fn get(&self, key: Key) -> Option<&MemValue> {
        self.entries
            .range((key, 0)..=(key, u64::MAX))
            .next_back()
            .map(|(_, value)| value)
    }

    /// Iterates all entries in ascending key, then ascending seq order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, u64, &MemValue)> {
        self.entries
            .iter()
            .map(|(&(key, seq), value)| (key, seq, value))
    }

    /// Iterates entries with key >= `start` in key-then-seq order.
    pub fn iter_from(&self, start: Key) -> impl Iterator<Item = (Key, u64, &MemValue)> {
        self.entries
            .range((start, 0)..)
            .map(|(&(key, seq), value)| (key, seq, value))
    }

    /// Approximate bytes held by the memtable.
    #[inline]
    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        self.mem_usage
    }

    /// Number of entries, shadowed versions included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the memtable holds no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memtable")
            .field("entries", &self.entries.len())
            .field("bytes", &self.mem_usage)
            .finish()
    }
}
