//! segment::meta — the segment metadata page codec (§3 "Segment file" item 1).
//!
//! Layout within the first `page_size` bytes of a segment file:
//!   offset 0       : CRC32-IEEE over bytes 4..page_size  (4 bytes)
//!   offset 4       : page count                           (4 bytes)
//!   offset 8       : address-space start                  (8 bytes)
//!   offset 16..end : reserved, zero

use byteorder::{BigEndian, ByteOrder};

use crate::consts::{META_ADDR_START_OFFSET, META_CRC_OFFSET, META_HEADER_LEN, META_PAGE_COUNT_OFFSET};
use crate::page::checksum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMeta {
    pub page_count: u32,
    pub address_start: u64,
}

impl SegmentMeta {
    pub fn new(address_start: u64) -> Self {
        Self { page_count: 0, address_start }
    }

    /// Encode into a full metadata page of `page_size` bytes, CRC freshly
    /// computed and reserved tail zeroed.
    pub fn encode(&self, page_size: usize) -> Vec<u8> {
        debug_assert!(page_size >= META_HEADER_LEN);
        let mut buf = vec![0u8; page_size];
        checksum::write_u32(&mut buf, META_PAGE_COUNT_OFFSET, self.page_count);
        BigEndian::write_u64(
            &mut buf[META_ADDR_START_OFFSET..META_ADDR_START_OFFSET + 8],
            self.address_start,
        );
        let crc = checksum::compute(&buf[META_CRC_OFFSET + 4..]);
        checksum::write_u32(&mut buf, META_CRC_OFFSET, crc);
        buf
    }

    /// Parse the fields without checking the CRC. Callers that need the
    /// integrity check should call `verify_crc` first.
    pub fn decode(buf: &[u8]) -> Self {
        let page_count = checksum::read_u32(buf, META_PAGE_COUNT_OFFSET);
        let address_start = BigEndian::read_u64(&buf[META_ADDR_START_OFFSET..META_ADDR_START_OFFSET + 8]);
        Self { page_count, address_start }
    }

    /// True if the stored CRC matches a freshly computed one over bytes 4..end.
    pub fn verify_crc(buf: &[u8]) -> bool {
        if buf.len() < META_HEADER_LEN {
            return false;
        }
        let stored = checksum::read_u32(buf, META_CRC_OFFSET);
        let calc = checksum::compute(&buf[META_CRC_OFFSET + 4..]);
        stored == calc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_roundtrips() {
        let meta = SegmentMeta { page_count: 42, address_start: 1024 };
        let buf = meta.encode(4096);
        assert!(SegmentMeta::verify_crc(&buf));
        assert_eq!(SegmentMeta::decode(&buf), meta);
    }

    #[test]
    fn flipping_crc_byte_fails_verification() {
        let meta = SegmentMeta::new(0);
        let mut buf = meta.encode(4096);
        buf[0] ^= 0xFF;
        assert!(!SegmentMeta::verify_crc(&buf));
    }

    #[test]
    fn flipping_page_count_fails_verification() {
        let meta = SegmentMeta { page_count: 5, address_start: 0 };
        let mut buf = meta.encode(4096);
        buf[META_PAGE_COUNT_OFFSET] ^= 0x01;
        assert!(!SegmentMeta::verify_crc(&buf));
    }

    #[test]
    fn reserved_tail_is_zero() {
        let meta = SegmentMeta::new(0);
        let buf = meta.encode(64);
        assert!(buf[META_HEADER_LEN..].iter().all(|&b| b == 0));
    }
}
