//! page::checksum — CRC32-IEEE helpers shared by the per-page CRC+LSN header
//! and the segment metadata page. Both on-disk layouts follow the same
//! shape: a 4-byte CRC field at offset 0 covering everything after it.

use byteorder::{BigEndian, ByteOrder};

/// CRC32-IEEE over `body`. Callers pass the slice with the CRC field itself
/// already excluded.
#[inline]
pub fn compute(body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

#[inline]
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    BigEndian::write_u32(&mut buf[offset..offset + 4], value);
}

#[inline]
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    BigEndian::read_u32(&buf[offset..offset + 4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_is_deterministic_and_sensitive_to_single_bit() {
        let a = vec![1u8, 2, 3, 4, 5];
        let mut b = a.clone();
        b[2] ^= 0x01;
        assert_eq!(compute(&a), compute(&a));
        assert_ne!(compute(&a), compute(&b));
    }

    #[test]
    fn write_then_read_roundtrips_big_endian() {
        let mut buf = [0u8; 8];
        write_u32(&mut buf, 0, 0xDEADBEEF);
        assert_eq!(buf[0..4], [0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(read_u32(&buf, 0), 0xDEADBEEF);
    }
}
