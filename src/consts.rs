//! consts — on-disk magic numbers and layout constants shared across modules.
//!
//! All multi-byte integers on disk are big-endian throughout (§6).

/// File name prefix for segment ("heap") files: `heapFile-<startAddress>`.
pub const SEGMENT_FILE_PREFIX: &str = "heapFile";
pub const SEGMENT_FILE_SEP: &str = "-";

/// Metadata page layout: CRC32-IEEE over bytes 4..end, page count, redundant
/// address-space start offset. Reserved tail is zero.
pub const META_CRC_OFFSET: usize = 0;
pub const META_CRC_LEN: usize = 4;
pub const META_PAGE_COUNT_OFFSET: usize = 4;
pub const META_PAGE_COUNT_LEN: usize = 4;
pub const META_ADDR_START_OFFSET: usize = 8;
pub const META_ADDR_START_LEN: usize = 8;
pub const META_HEADER_LEN: usize = 16;

/// Per-page meta header (checksum + LSN), when enabled (§3 "Page").
pub const PAGE_HDR_CRC_OFFSET: usize = 0;
pub const PAGE_HDR_CRC_LEN: usize = 4;
pub const PAGE_HDR_LSN_OFFSET: usize = 4;
pub const PAGE_HDR_LSN_LEN: usize = 4;
pub const PAGE_HDR_LEN: usize = 8;

pub const DEFAULT_PAGE_SIZE: u32 = 4096;
