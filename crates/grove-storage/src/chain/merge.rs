//! Page merge iterator.
//!
//! A key-ordered cursor over every record of an overflow chain. One
//! sub-cursor per page; each step yields the smallest current key across the
//! sub-cursors. When the same key appears on several pages, the sub-cursor
//! of the *later* page wins, because overflow pages store newer writes.
//!
//! The iterator is read-only and does not manage pin lifetimes; the chain it
//! was built from must stay pinned while it is in use.

use grove_common::error::GroveResult;
use grove_common::types::{Key, OpKind, Record};

use crate::page;

use super::OverflowChain;

/// Cursor over one decoded page.
struct PageCursor {
    records: Vec<Record>,
    pos: usize,
}

impl PageCursor {
    #[inline]
    fn current(&self) -> Option<&Record> {
        self.records.get(self.pos)
    }
}

/// Key-ordered merge cursor over an overflow chain.
pub struct PageMergeIterator {
    cursors: Vec<PageCursor>,
}

impl PageMergeIterator {
    /// Builds a cursor over `chain`, optionally positioned at the first
    /// record with key >= `seek_key`.
    pub fn new(chain: &OverflowChain, seek_key: Option<Key>) -> GroveResult<Self> {
        let mut cursors = Vec::with_capacity(chain.len());
        for frame in chain.frames() {
            let records = page::read_records(&frame.data())?;
            let pos = match seek_key {
                Some(key) => records.partition_point(|r| r.key < key),
                None => 0,
            };
            cursors.push(PageCursor { records, pos });
        }
        Ok(Self { cursors })
    }

    /// Returns true while the cursor points at a record.
    #[inline]
    pub fn valid(&self) -> bool {
        self.cursors.iter().any(|c| c.current().is_some())
    }

    /// Returns the current record.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not [`valid`](Self::valid).
    pub fn record(&self) -> &Record {
        let idx = self.winner().expect("iterator is exhausted");
        self.cursors[idx].current().unwrap()
    }

    /// Returns the current record's key.
    #[inline]
    pub fn key(&self) -> Key {
        self.record().key
    }

    /// Returns the current record's op kind.
    #[inline]
    pub fn kind(&self) -> OpKind {
        self.record().kind
    }

    /// Advances past the current record.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not [`valid`](Self::valid).
    pub fn next(&mut self) {
        let idx = self.winner().expect("iterator is exhausted");
        self.cursors[idx].pos += 1;
    }

    /// Index of the sub-cursor holding the smallest current key. Ties go to
    /// the later page.
    fn winner(&self) -> Option<usize> {
        let mut best: Option<(usize, Key)> = None;
        for (idx, cursor) in self.cursors.iter().enumerate() {
            if let Some(record) = cursor.current() {
                // `<=` so an equal key from a later page replaces the
                // earlier one.
                if best.map_or(true, |(_, key)| record.key <= key) {
                    best = Some((idx, record.key));
                }
            }
        }
        best.map(|(idx, _)| idx)
    }
}

impl std::fmt::Debug for PageMergeIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageMergeIterator")
            .field("pages", &self.cursors.len())
            .field("valid", &self.valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferManager;
    use crate::chain::{fix_overflow_chain, ChainLatchTable};
    use crate::page::PageHeader;
    use bytes::Bytes;
    use grove_common::types::PhysicalPageId;
    use std::sync::Arc;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 4096;

    struct Fixture {
        _dir: tempfile::TempDir,
        manager: BufferManager,
        latches: Arc<ChainLatchTable>,
        base: PhysicalPageId,
    }

    /// Builds a two-page chain with explicit per-page contents.
    fn two_page_chain(base_records: &[Record], overflow_records: &[Record]) -> Fixture {
        let dir = tempdir().unwrap();
        let manager = BufferManager::open(dir.path().join("data.grove"), PAGE_SIZE, 8).unwrap();
        let latches = Arc::new(ChainLatchTable::new());

        let (base, mut base_guard) = manager.allocate_page().unwrap();
        let (overflow, mut overflow_guard) = manager.allocate_page().unwrap();
        {
            let mut data = base_guard.data_mut();
            let mut header = PageHeader::new(&mut data);
            header.initialize(Key::new(0));
            header.set_overflow(overflow);
        }
        crate::page::write_records(&mut base_guard.data_mut(), base_records).unwrap();
        PageHeader::new(&mut overflow_guard.data_mut()).initialize(Key::new(0));
        crate::page::write_records(&mut overflow_guard.data_mut(), overflow_records).unwrap();

        drop(base_guard);
        drop(overflow_guard);
        Fixture {
            _dir: dir,
            manager,
            latches,
            base,
        }
    }

    fn rec(key: u64, value: &'static [u8]) -> Record {
        Record::write(Key::new(key), Bytes::from_static(value))
    }

    fn collect(f: &Fixture, seek: Option<Key>) -> Vec<Record> {
        let chain = fix_overflow_chain(&f.manager, &f.latches, f.base, false, false)
            .unwrap()
            .unwrap();
        let mut it = PageMergeIterator::new(&chain, seek).unwrap();
        let mut out = Vec::new();
        while it.valid() {
            out.push(it.record().clone());
            it.next();
        }
        out
    }

    #[test]
    fn test_interleaved_pages_merge_in_order() {
        let f = two_page_chain(
            &[rec(10, b"a"), rec(30, b"c"), rec(50, b"e")],
            &[rec(20, b"b"), rec(40, b"d")],
        );
        let keys: Vec<u64> = collect(&f, None).iter().map(|r| r.key.as_u64()).collect();
        assert_eq!(keys, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_tie_prefers_later_page() {
        let f = two_page_chain(&[rec(10, b"old")], &[rec(10, b"new")]);

        let records = collect(&f, None);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, Bytes::from_static(b"new"));
        assert_eq!(records[1].value, Bytes::from_static(b"old"));
    }

    #[test]
    fn test_seek_positions_all_cursors() {
        let f = two_page_chain(
            &[rec(10, b"a"), rec(30, b"c")],
            &[rec(20, b"b"), rec(40, b"d")],
        );
        let keys: Vec<u64> = collect(&f, Some(Key::new(25)))
            .iter()
            .map(|r| r.key.as_u64())
            .collect();
        assert_eq!(keys, vec![30, 40]);
    }

    #[test]
    fn test_seek_past_end_is_exhausted() {
        let f = two_page_chain(&[rec(10, b"a")], &[rec(20, b"b")]);
        assert!(collect(&f, Some(Key::new(100))).is_empty());
    }

    #[test]
    fn test_tombstones_are_yielded() {
        let f = two_page_chain(&[rec(10, b"a")], &[Record::tombstone(Key::new(10))]);

        let records = collect(&f, None);
        assert_eq!(records.len(), 2);
        assert!(records[0].is_tombstone());
        assert!(!records[1].is_tombstone());
    }

    #[test]
    fn test_empty_chain_is_invalid() {
        let f = two_page_chain(&[], &[]);
        let chain = fix_overflow_chain(&f.manager, &f.latches, f.base, false, false)
            .unwrap()
            .unwrap();
        let it = PageMergeIterator::new(&chain, None).unwrap();
        assert!(!it.valid());
    }
}
