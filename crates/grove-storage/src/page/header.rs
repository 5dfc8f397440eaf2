//! Page header views.
//!
//! [`PageHeader`] is a mutable view over the first bytes of a page buffer;
//! [`PageHeaderRef`] is the read-only counterpart. Neither owns the buffer.

use grove_common::types::{Key, PhysicalPageId};

use super::checksum::compute_page_checksum;
use super::{CHECKSUM_OFFSET, PAGE_HEADER_SIZE, PAGE_MAGIC};

/// Mutable page header view.
#[derive(Debug)]
pub struct PageHeader<'a> {
    data: &'a mut [u8],
}

impl<'a> PageHeader<'a> {
    /// Creates a header view into the given page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`PAGE_HEADER_SIZE`].
    #[inline]
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for page header"
        );
        Self { data }
    }

    /// Initializes a fresh page: valid magic, the given lower boundary, no
    /// overflow pointer, no records.
    pub fn initialize(&mut self, lower_boundary: Key) {
        self.data[0..2].copy_from_slice(&PAGE_MAGIC.to_le_bytes());
        self.data[2] = 0;
        self.data[3] = 0;
        self.set_checksum(0);
        self.set_lower_boundary(lower_boundary);
        self.set_overflow(PhysicalPageId::INVALID);
        self.set_record_count(0);
        self.set_record_bytes(0);
        self.data[30..PAGE_HEADER_SIZE].fill(0);
    }

    /// Returns the magic bytes.
    #[inline]
    pub fn magic(&self) -> u16 {
        u16::from_le_bytes([self.data[0], self.data[1]])
    }

    /// Validates the magic bytes.
    #[inline]
    pub fn is_valid_magic(&self) -> bool {
        self.magic() == PAGE_MAGIC
    }

    /// Returns the stored checksum.
    #[inline]
    pub fn checksum(&self) -> u32 {
        let bytes: [u8; 4] = self.data[4..8].try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    /// Sets the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, checksum: u32) {
        self.data[4..8].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Computes and stores the page checksum.
    ///
    /// Call this after all other modifications to the page are complete.
    pub fn update_checksum(&mut self) {
        let checksum = compute_page_checksum(self.data, CHECKSUM_OFFSET);
        self.set_checksum(checksum);
    }

    /// Returns the page's lower boundary key.
    #[inline]
    pub fn lower_boundary(&self) -> Key {
        let bytes: [u8; 8] = self.data[8..16].try_into().unwrap();
        Key::from_be_bytes(bytes)
    }

    /// Sets the page's lower boundary key.
    #[inline]
    pub fn set_lower_boundary(&mut self, key: Key) {
        self.data[8..16].copy_from_slice(&key.to_be_bytes());
    }

    /// Returns the overflow page id (INVALID if none).
    #[inline]
    pub fn overflow(&self) -> PhysicalPageId {
        let bytes: [u8; 8] = self.data[16..24].try_into().unwrap();
        PhysicalPageId::from_le_bytes(bytes)
    }

    /// Sets the overflow page id.
    #[inline]
    pub fn set_overflow(&mut self, page_id: PhysicalPageId) {
        self.data[16..24].copy_from_slice(&page_id.to_le_bytes());
    }

    /// Returns the number of records stored in the page.
    #[inline]
    pub fn record_count(&self) -> u16 {
        let bytes: [u8; 2] = self.data[24..26].try_into().unwrap();
        u16::from_le_bytes(bytes)
    }

    /// Sets the record count.
    #[inline]
    pub fn set_record_count(&mut self, count: u16) {
        self.data[24..26].copy_from_slice(&count.to_le_bytes());
    }

    /// Returns the number of bytes occupied by the record area.
    #[inline]
    pub fn record_bytes(&self) -> u32 {
        let bytes: [u8; 4] = self.data[26..30].try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    /// Sets the record area byte count.
    #[inline]
    pub fn set_record_bytes(&mut self, bytes: u32) {
        self.data[26..30].copy_from_slice(&bytes.to_le_bytes());
    }
}

/// Read-only page header view.
#[derive(Debug)]
pub struct PageHeaderRef<'a> {
    data: &'a [u8],
}

impl<'a> PageHeaderRef<'a> {
    /// Creates a read-only header view.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`PAGE_HEADER_SIZE`].
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        assert!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for page header"
        );
        Self { data }
    }

    /// Returns the magic bytes.
    #[inline]
    pub fn magic(&self) -> u16 {
        u16::from_le_bytes([self.data[0], self.data[1]])
    }

    /// Validates the magic bytes.
    #[inline]
    pub fn is_valid_magic(&self) -> bool {
        self.magic() == PAGE_MAGIC
    }

    /// Returns the stored checksum.
    #[inline]
    pub fn checksum(&self) -> u32 {
        let bytes: [u8; 4] = self.data[4..8].try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    /// Verifies the page checksum.
    pub fn verify_checksum(&self) -> bool {
        let computed = compute_page_checksum(self.data, CHECKSUM_OFFSET);
        self.checksum() == computed
    }

    /// Returns the page's lower boundary key.
    #[inline]
    pub fn lower_boundary(&self) -> Key {
        let bytes: [u8; 8] = self.data[8..16].try_into().unwrap();
        Key::from_be_bytes(bytes)
    }

    /// Returns the overflow page id (INVALID if none).
    #[inline]
    pub fn overflow(&self) -> PhysicalPageId {
        let bytes: [u8; 8] = self.data[16..24].try_into().unwrap();
        PhysicalPageId::from_le_bytes(bytes)
    }

    /// Returns the number of records stored in the page.
    #[inline]
    pub fn record_count(&self) -> u16 {
        let bytes: [u8; 2] = self.data[24..26].try_into().unwrap();
        u16::from_le_bytes(bytes)
    }

    /// Returns the number of bytes occupied by the record area.
    #[inline]
    pub fn record_bytes(&self) -> u32 {
        let bytes: [u8; 4] = self.data[26..30].try_into().unwrap();
        u32::from_le_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PAGE_SIZE: usize = 4096;

    #[test]
    fn test_initialize() {
        let mut buffer = vec![0xAAu8; TEST_PAGE_SIZE];
        let mut header = PageHeader::new(&mut buffer);
        header.initialize(Key::new(100));

        assert!(header.is_valid_magic());
        assert_eq!(header.lower_boundary(), Key::new(100));
        assert_eq!(header.overflow(), PhysicalPageId::INVALID);
        assert_eq!(header.record_count(), 0);
        assert_eq!(header.record_bytes(), 0);
    }

    #[test]
    fn test_field_roundtrips() {
        let mut buffer = vec![0u8; TEST_PAGE_SIZE];
        let mut header = PageHeader::new(&mut buffer);
        header.initialize(Key::new(0));

        header.set_lower_boundary(Key::new(u64::MAX - 1));
        header.set_overflow(PhysicalPageId::new(77));
        header.set_record_count(12);
        header.set_record_bytes(3400);

        assert_eq!(header.lower_boundary(), Key::new(u64::MAX - 1));
        assert_eq!(header.overflow(), PhysicalPageId::new(77));
        assert_eq!(header.record_count(), 12);
        assert_eq!(header.record_bytes(), 3400);
    }

    #[test]
    fn test_checksum_roundtrip() {
        let mut buffer = vec![0u8; TEST_PAGE_SIZE];
        {
            let mut header = PageHeader::new(&mut buffer);
            header.initialize(Key::new(5));
            header.update_checksum();
        }

        let header = PageHeaderRef::new(&buffer);
        assert!(header.verify_checksum());

        buffer[200] = 0xFF;
        let header = PageHeaderRef::new(&buffer);
        assert!(!header.verify_checksum());
    }

    #[test]
    fn test_ref_view_matches() {
        let mut buffer = vec![0u8; TEST_PAGE_SIZE];
        {
            let mut header = PageHeader::new(&mut buffer);
            header.initialize(Key::new(42));
            header.set_overflow(PhysicalPageId::new(9));
            header.set_record_count(3);
        }

        let header = PageHeaderRef::new(&buffer);
        assert!(header.is_valid_magic());
        assert_eq!(header.lower_boundary(), Key::new(42));
        assert_eq!(header.overflow(), PhysicalPageId::new(9));
        assert_eq!(header.record_count(), 3);
    }

    #[test]
    #[should_panic(expected = "buffer too small")]
    fn test_buffer_too_small() {
        let mut buffer = vec![0u8; 16];
        let _ = PageHeader::new(&mut buffer);
    }
}
