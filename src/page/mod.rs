//! page — a single cached page buffer with its read/write lock and optional
//! CRC+LSN header (§3 "Page", §4.4 "Serialization").
//!
//! The lock lives on the `Page` itself, not in a side table, so eviction
//! can never drop a page whose lock a caller still holds (§9).

pub mod checksum;

use std::sync::RwLock;

use crate::consts::{PAGE_HDR_CRC_OFFSET, PAGE_HDR_LEN, PAGE_HDR_LSN_OFFSET};
use crate::error::{Error, Result};

struct Body {
    buf: Vec<u8>,
    dirty: bool,
    current_lsn: u32,
}

pub struct Page {
    page_number: u64,
    page_meta_enabled: bool,
    page_size: usize,
    inner: RwLock<Body>,
}

impl Page {
    /// A freshly allocated, zeroed buffer (cache miss populated by a heap read).
    pub fn new(page_number: u64, page_size: usize, page_meta_enabled: bool) -> Self {
        Self::from_bytes(page_number, page_size, page_meta_enabled, vec![0u8; page_size])
    }

    /// Wrap bytes already read off disk.
    pub fn from_bytes(page_number: u64, page_size: usize, page_meta_enabled: bool, raw: Vec<u8>) -> Self {
        debug_assert_eq!(raw.len(), page_size);
        let current_lsn = if page_meta_enabled && raw.len() >= PAGE_HDR_LEN {
            checksum::read_u32(&raw, PAGE_HDR_LSN_OFFSET)
        } else {
            0
        };
        Self {
            page_number,
            page_meta_enabled,
            page_size,
            inner: RwLock::new(Body { buf: raw, dirty: false, current_lsn }),
        }
    }

    pub fn page_number(&self) -> u64 {
        self.page_number
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn payload_offset(&self) -> usize {
        if self.page_meta_enabled { PAGE_HDR_LEN } else { 0 }
    }

    /// Copy the user payload into `out`. Shared lock.
    pub fn get_page_buffer(&self, out: &mut [u8]) -> Result<()> {
        let body = self.inner.read().expect("page lock poisoned");
        let off = self.payload_offset();
        let avail = body.buf.len() - off;
        if out.len() > avail {
            return Err(Error::OutOfBounds { page: self.page_number, first: 0, last: avail as u64 });
        }
        out.copy_from_slice(&body.buf[off..off + out.len()]);
        Ok(())
    }

    /// Overwrite the user payload and mark the page dirty. Exclusive lock:
    /// this is the only mutator of the buffer (§4.4 "Single-writer").
    pub fn set_page_buffer(&self, data: &[u8], lsn: u32) -> Result<()> {
        let mut body = self.inner.write().expect("page lock poisoned");
        let off = self.payload_offset();
        let avail = body.buf.len() - off;
        if data.len() > avail {
            return Err(Error::OutOfBounds { page: self.page_number, first: 0, last: avail as u64 });
        }
        body.buf[off..off + data.len()].copy_from_slice(data);
        body.dirty = true;
        body.current_lsn = lsn;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.read().expect("page lock poisoned").dirty
    }

    pub fn clear_dirty(&self) {
        self.inner.write().expect("page lock poisoned").dirty = false;
    }

    pub fn current_lsn(&self) -> u32 {
        self.inner.read().expect("page lock poisoned").current_lsn
    }

    /// Produce the on-disk bytes. If page meta is enabled this stamps the
    /// current LSN into bytes 4..8 and recomputes the CRC over bytes
    /// 4..end into bytes 0..4.
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = self.inner.write().expect("page lock poisoned");
        if self.page_meta_enabled && body.buf.len() >= PAGE_HDR_LEN {
            let lsn = body.current_lsn;
            checksum::write_u32(&mut body.buf, PAGE_HDR_LSN_OFFSET, lsn);
            let crc = checksum::compute(&body.buf[PAGE_HDR_CRC_OFFSET + 4..]);
            checksum::write_u32(&mut body.buf, PAGE_HDR_CRC_OFFSET, crc);
        }
        body.buf.clone()
    }

    /// Serialize, write through via `write`, and clear the dirty bit, all
    /// under one hold of this page's own lock (§4.4 "Flush deliberately
    /// holds the shared lock through the entire write-then-callback so a
    /// concurrent mutation cannot race the serialized bytes in flight").
    /// Returns `Ok(false)` without calling `write` if the page wasn't
    /// dirty. A `set_page_buffer` that lands after `write` succeeds but
    /// before this returns is impossible: both take the same lock, and
    /// this method holds it for the whole cycle, so that write is never
    /// silently clobbered by a dirty bit cleared out from under it.
    pub fn flush_with<F>(&self, write: F) -> Result<bool>
    where
        F: FnOnce(&[u8]) -> Result<()>,
    {
        let mut body = self.inner.write().expect("page lock poisoned");
        if !body.dirty {
            return Ok(false);
        }
        if self.page_meta_enabled && body.buf.len() >= PAGE_HDR_LEN {
            let lsn = body.current_lsn;
            checksum::write_u32(&mut body.buf, PAGE_HDR_LSN_OFFSET, lsn);
            let crc = checksum::compute(&body.buf[PAGE_HDR_CRC_OFFSET + 4..]);
            checksum::write_u32(&mut body.buf, PAGE_HDR_CRC_OFFSET, crc);
        }
        write(&body.buf)?;
        body.dirty = false;
        Ok(true)
    }

    /// Verify the stored CRC against a freshly computed one. Always true
    /// when page meta is disabled (§8 invariant 8 "CRC defense").
    pub fn check_crc_match(&self) -> bool {
        if !self.page_meta_enabled {
            return true;
        }
        let body = self.inner.read().expect("page lock poisoned");
        if body.buf.len() < PAGE_HDR_LEN {
            return false;
        }
        let stored = checksum::read_u32(&body.buf, PAGE_HDR_CRC_OFFSET);
        let calc = checksum::compute(&body.buf[PAGE_HDR_CRC_OFFSET + 4..]);
        stored == calc
    }
}
