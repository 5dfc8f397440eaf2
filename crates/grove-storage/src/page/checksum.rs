//! Page checksum utilities.
//!
//! Uses CRC32 for fast checksumming with hardware acceleration on modern
//! CPUs.

/// Computes a CRC32 checksum for the given data.
#[inline]
pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Verifies that the checksum matches the data.
#[inline]
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

/// Computes a checksum for a page, excluding the checksum field itself.
///
/// Used when writing pages: the checksum covers everything except the 4-byte
/// field it is stored in, so it can be verified in place after a read.
pub fn compute_page_checksum(page_data: &[u8], checksum_offset: usize) -> u32 {
    debug_assert!(checksum_offset + 4 <= page_data.len());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_data[..checksum_offset]);
    hasher.update(&page_data[checksum_offset + 4..]);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_checksum_deterministic() {
        let data = b"grove page bytes";
        assert_eq!(compute_checksum(data), compute_checksum(data));
        assert_ne!(compute_checksum(data), compute_checksum(b"other bytes"));
    }

    #[test]
    fn test_verify_checksum() {
        let data = b"some data";
        let checksum = compute_checksum(data);
        assert!(verify_checksum(data, checksum));
        assert!(!verify_checksum(data, checksum.wrapping_add(1)));
    }

    #[test]
    fn test_page_checksum_ignores_checksum_field() {
        let mut page = vec![0u8; 4096];
        page[100..105].copy_from_slice(b"hello");

        let before = compute_page_checksum(&page, 4);
        page[4..8].copy_from_slice(&[0xFF; 4]);
        let after = compute_page_checksum(&page, 4);
        assert_eq!(before, after);

        page[100] = b'x';
        assert_ne!(compute_page_checksum(&page, 4), before);
    }
}
