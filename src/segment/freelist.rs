//! segment::freelist — per-segment bitmap allocator with an in-memory
//! linked-list accelerator reconstructed at open (§4.3).
//!
//! The bitmap is the only persisted form. `next`/`head` are rebuilt by a
//! single linear scan whenever a `FreeList` is constructed from bytes.

use crate::error::{Error, Result};

const NONE: i64 = -1;

pub struct FreeList {
    bitmap: Vec<u8>,
    next: Vec<i64>,
    head: i64,
    free_count: u64,
    capacity: u64,
}

impl FreeList {
    /// Reconstruct from on-disk bitmap bytes. `capacity` bits are meaningful;
    /// any bits beyond it (padding out to a byte/page boundary) are ignored.
    pub fn from_bitmap(bitmap: Vec<u8>, capacity: u64) -> Self {
        let mut fl = Self { bitmap, next: Vec::new(), head: NONE, free_count: 0, capacity };
        fl.reconstruct();
        fl
    }

    /// A brand new, entirely-free bitmap sized for `capacity` bits.
    pub fn new_empty(capacity: u64) -> Self {
        let bytes = bitmap_len_bytes(capacity);
        Self::from_bitmap(vec![0u8; bytes], capacity)
    }

    fn is_allocated(&self, idx: u64) -> bool {
        let byte = self.bitmap[(idx / 8) as usize];
        (byte >> (idx % 8)) & 1 == 1
    }

    fn set_allocated(&mut self, idx: u64, allocated: bool) {
        let byte_idx = (idx / 8) as usize;
        let bit = 1u8 << (idx % 8);
        if allocated {
            self.bitmap[byte_idx] |= bit;
        } else {
            self.bitmap[byte_idx] &= !bit;
        }
    }

    /// Walk the bitmap from the last index to the first, chaining every
    /// free bit onto `head`, so the resulting list pops in ascending order.
    fn reconstruct(&mut self) {
        self.next = vec![NONE; self.capacity as usize];
        self.head = NONE;
        self.free_count = 0;
        for idx in (0..self.capacity).rev() {
            if !self.is_allocated(idx) {
                self.next[idx as usize] = self.head;
                self.head = idx as i64;
                self.free_count += 1;
            }
        }
    }

    pub fn free_count(&self) -> u64 {
        self.free_count
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn bitmap_bytes(&self) -> &[u8] {
        &self.bitmap
    }

    /// `false` for any index at or past the current capacity.
    pub fn is_free(&self, idx: u64) -> bool {
        if idx >= self.capacity {
            return false;
        }
        !self.is_allocated(idx)
    }

    /// Grow capacity to `new_capacity`, appending new, entirely-free bits,
    /// and rebuild the chain. Only called at segment extend time.
    pub fn grow(&mut self, new_capacity: u64) {
        debug_assert!(new_capacity >= self.capacity);
        let needed_bytes = bitmap_len_bytes(new_capacity);
        if needed_bytes > self.bitmap.len() {
            self.bitmap.resize(needed_bytes, 0);
        }
        self.capacity = new_capacity;
        self.reconstruct();
    }

    /// Shrink capacity to `new_capacity`, dropping any pages at or beyond it
    /// from the chain. Called when a segment is truncated. The bitmap bytes
    /// beyond the new capacity are left in place but become unreachable.
    pub fn shrink(&mut self, new_capacity: u64) {
        debug_assert!(new_capacity <= self.capacity);
        self.capacity = new_capacity;
        self.reconstruct();
    }

    /// Pop up to `k` free indices from the head, marking each allocated in
    /// the bitmap. Returns fewer than `k` if the list empties first.
    pub fn get_pages(&mut self, k: u64) -> Vec<u64> {
        let mut out = Vec::with_capacity(k as usize);
        while (out.len() as u64) < k && self.head != NONE {
            let idx = self.head as u64;
            self.head = self.next[idx as usize];
            self.next[idx as usize] = NONE;
            self.set_allocated(idx, true);
            self.free_count -= 1;
            out.push(idx);
        }
        out
    }

    /// Release pages back onto the list. Out-of-range indices are an error;
    /// already-free indices are silently skipped, making this idempotent.
    pub fn release_pages(&mut self, indices: &[u64]) -> Result<()> {
        for &idx in indices {
            if idx >= self.capacity {
                return Err(Error::OutOfBounds {
                    page: idx,
                    first: 0,
                    last: self.capacity.saturating_sub(1),
                });
            }
            if !self.is_allocated(idx) {
                continue;
            }
            self.set_allocated(idx, false);
            self.next[idx as usize] = self.head;
            self.head = idx as i64;
            self.free_count += 1;
        }
        Ok(())
    }
}

/// Bitmap byte length for `capacity` bits, one bit per page.
pub fn bitmap_len_bytes(capacity: u64) -> usize {
    ((capacity + 7) / 8) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_then_release_restores_free_count() {
        let mut fl = FreeList::new_empty(8);
        assert_eq!(fl.free_count(), 8);
        let got = fl.get_pages(3);
        assert_eq!(got.len(), 3);
        assert_eq!(fl.free_count(), 5);
        fl.release_pages(&got).unwrap();
        assert_eq!(fl.free_count(), 8);
    }

    #[test]
    fn release_is_idempotent_on_double_free() {
        let mut fl = FreeList::new_empty(4);
        let got = fl.get_pages(2);
        fl.release_pages(&got).unwrap();
        fl.release_pages(&got).unwrap();
        assert_eq!(fl.free_count(), 4);
    }

    #[test]
    fn shortfall_returns_fewer_than_requested() {
        let mut fl = FreeList::new_empty(2);
        let got = fl.get_pages(5);
        assert_eq!(got.len(), 2);
        assert_eq!(fl.free_count(), 0);
    }

    #[test]
    fn reconstruct_from_bitmap_matches_allocated_bits() {
        let mut bitmap = vec![0u8; 1];
        bitmap[0] = 0b0000_0101; // pages 0 and 2 allocated
        let mut fl = FreeList::from_bitmap(bitmap, 8);
        assert_eq!(fl.free_count(), 6);
        // page 1 is free, should be poppable
        let got = fl.get_pages(1);
        assert_eq!(got, vec![1]);
    }

    #[test]
    fn release_out_of_range_is_error() {
        let mut fl = FreeList::new_empty(4);
        assert!(fl.release_pages(&[10]).is_err());
    }

    #[test]
    fn grow_adds_capacity_as_free() {
        let mut fl = FreeList::new_empty(4);
        fl.get_pages(4);
        assert_eq!(fl.free_count(), 0);
        fl.grow(8);
        assert_eq!(fl.free_count(), 4);
    }
}
