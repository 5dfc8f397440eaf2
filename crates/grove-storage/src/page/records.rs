//! Record area encoding.
//!
//! The record area starts at [`PAGE_HEADER_SIZE`](super::PAGE_HEADER_SIZE)
//! and stores records back to back in ascending key order. Pages are small
//! enough that a chain write decodes the area, mutates it in memory, and
//! re-encodes it wholesale.

use bytes::Bytes;
use grove_common::error::{GroveError, GroveResult};
use grove_common::types::{Key, OpKind, Record};

use super::{PageHeader, PageHeaderRef, PAGE_HEADER_SIZE, RECORD_OVERHEAD};

/// Returns the encoded size of a record in bytes.
#[inline]
#[must_use]
pub fn encoded_len(record: &Record) -> usize {
    RECORD_OVERHEAD + record.value.len()
}

/// Returns the total encoded size of a slice of records.
#[inline]
#[must_use]
pub fn records_byte_len(records: &[Record]) -> usize {
    records.iter().map(encoded_len).sum()
}

/// Decodes all records from a page buffer.
///
/// Returns records in the order they are stored, which is ascending key
/// order for well-formed pages. Malformed lengths or op kinds surface as
/// `Corruption`.
pub fn read_records(page: &[u8]) -> GroveResult<Vec<Record>> {
    let header = PageHeaderRef::new(page);
    let count = header.record_count() as usize;
    let area_len = header.record_bytes() as usize;

    if PAGE_HEADER_SIZE + area_len > page.len() {
        return Err(GroveError::corruption("record area exceeds page size"));
    }

    let mut records = Vec::with_capacity(count);
    let mut offset = PAGE_HEADER_SIZE;
    let end = PAGE_HEADER_SIZE + area_len;

    while offset < end {
        if offset + RECORD_OVERHEAD > end {
            return Err(GroveError::corruption("truncated record header"));
        }
        let key = Key::from_be_bytes(page[offset..offset + 8].try_into().unwrap());
        let kind = OpKind::from_u8(page[offset + 8])
            .ok_or_else(|| GroveError::corruption("unknown record op kind"))?;
        let value_len =
            u32::from_le_bytes(page[offset + 9..offset + 13].try_into().unwrap()) as usize;
        offset += RECORD_OVERHEAD;

        if offset + value_len > end {
            return Err(GroveError::corruption("truncated record value"));
        }
        let value = Bytes::copy_from_slice(&page[offset..offset + value_len]);
        offset += value_len;

        records.push(Record { key, value, kind });
    }

    if records.len() != count {
        return Err(GroveError::corruption("record count mismatch"));
    }
    Ok(records)
}

/// Encodes a sorted run of records into a page buffer.
///
/// Overwrites the record area and updates the header's count and byte
/// fields. The caller is responsible for checking capacity beforehand;
/// records that do not fit return `InvalidArgument`.
///
/// Records must be sorted by strictly ascending key.
pub fn write_records(page: &mut [u8], records: &[Record]) -> GroveResult<()> {
    debug_assert!(
        records.windows(2).all(|w| w[0].key < w[1].key),
        "records must be sorted by strictly ascending key"
    );

    let total = records_byte_len(records);
    if PAGE_HEADER_SIZE + total > page.len() {
        return Err(GroveError::invalid_argument(
            "records do not fit in one page",
        ));
    }
    if records.len() > u16::MAX as usize {
        return Err(GroveError::invalid_argument("too many records for a page"));
    }

    let mut offset = PAGE_HEADER_SIZE;
    for record in records {
        page[offset..offset + 8].copy_from_slice(&record.key.to_be_bytes());
        page[offset + 8] = record.kind.as_u8();
        page[offset + 9..offset + 13]
            .copy_from_slice(&(record.value.len() as u32).to_le_bytes());
        offset += RECORD_OVERHEAD;
        page[offset..offset + record.value.len()].copy_from_slice(&record.value);
        offset += record.value.len();
    }

    let mut header = PageHeader::new(page);
    header.set_record_count(records.len() as u16);
    header.set_record_bytes(total as u32);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PAGE_SIZE: usize = 4096;

    fn make_page(lower: Key) -> Vec<u8> {
        let mut page = vec![0u8; TEST_PAGE_SIZE];
        PageHeader::new(&mut page).initialize(lower);
        page
    }

    fn sample_records() -> Vec<Record> {
        vec![
            Record::write(Key::new(10), Bytes::from_static(b"ten")),
            Record::tombstone(Key::new(20)),
            Record::write(Key::new(30), Bytes::from_static(b"thirty")),
        ]
    }

    #[test]
    fn test_roundtrip() {
        let mut page = make_page(Key::new(10));
        let records = sample_records();

        write_records(&mut page, &records).unwrap();
        let decoded = read_records(&page).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_empty_page() {
        let page = make_page(Key::new(0));
        assert!(read_records(&page).unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_shrinks() {
        let mut page = make_page(Key::new(10));
        write_records(&mut page, &sample_records()).unwrap();

        let shorter = vec![Record::write(Key::new(15), Bytes::from_static(b"x"))];
        write_records(&mut page, &shorter).unwrap();
        assert_eq!(read_records(&page).unwrap(), shorter);
    }

    #[test]
    fn test_overflow_rejected() {
        let mut page = make_page(Key::new(0));
        let big = vec![Record::write(
            Key::new(1),
            Bytes::from(vec![0u8; TEST_PAGE_SIZE]),
        )];
        assert!(matches!(
            write_records(&mut page, &big),
            Err(GroveError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_corrupt_op_kind() {
        let mut page = make_page(Key::new(10));
        write_records(&mut page, &sample_records()).unwrap();

        // First record's op kind byte
        page[PAGE_HEADER_SIZE + 8] = 0x7F;
        assert!(matches!(
            read_records(&page),
            Err(GroveError::Corruption { .. })
        ));
    }

    #[test]
    fn test_corrupt_value_len() {
        let mut page = make_page(Key::new(10));
        write_records(&mut page, &sample_records()).unwrap();

        // Stretch the first value length past the record area
        page[PAGE_HEADER_SIZE + 9..PAGE_HEADER_SIZE + 13]
            .copy_from_slice(&(u32::MAX).to_le_bytes());
        assert!(matches!(
            read_records(&page),
            Err(GroveError::Corruption { .. })
        ));
    }

    #[test]
    fn test_encoded_len() {
        let rec = Record::write(Key::new(1), Bytes::from_static(b"abcd"));
        assert_eq!(encoded_len(&rec), RECORD_OVERHEAD + 4);
        assert_eq!(records_byte_len(&[rec.clone(), rec]), 2 * (RECORD_OVERHEAD + 4));
    }
}
