//! heap — one contiguous logical address space over an ordered collection
//! of segments (§4.2). Segments hold no back-pointer; the heap resolves
//! ownership of a page number by arithmetic, never by traversal.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::segment::{self, Segment, SegmentLayout};

struct HeapState {
    /// Keyed by address_start, which is always a multiple of
    /// `max_pages_per_segment` — this makes `P / max_pages_per_segment`
    /// both the segment index and the map key.
    segments: BTreeMap<u64, Segment>,
    /// Where the next brand-new segment would begin, kept even once the
    /// heap trims back to zero segments so addressing stays monotonic.
    next_address_start: u64,
}

impl HeapState {
    fn first(&self) -> u64 {
        *self.segments.keys().next().unwrap_or(&self.next_address_start)
    }

    fn last(&self) -> Option<u64> {
        let (&start, seg) = self.segments.iter().next_back()?;
        if seg.page_count() == 0 {
            return None;
        }
        Some(start + seg.page_count() - 1)
    }

    fn total_pages(&self) -> u64 {
        self.segments.values().map(|s| s.page_count()).sum()
    }

    fn free_pages(&self) -> u64 {
        self.segments.values().map(|s| s.free_count()).sum()
    }
}

pub struct Heap {
    dir: std::path::PathBuf,
    layout: SegmentLayout,
    extend_batch: u64,
    state: RwLock<HeapState>,
}

impl Heap {
    /// Scan `cfg.file_directory` for existing `heapFile-<N>` files and
    /// reopen each; an empty or missing directory yields a fresh, empty
    /// heap (§6 "Directory state").
    pub fn open(cfg: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.file_directory).map_err(Error::Io)?;
        let layout = SegmentLayout::compute(cfg.page_size_bytes, cfg.max_heap_file_size_bytes);

        let mut segments = BTreeMap::new();
        for entry in std::fs::read_dir(&cfg.file_directory).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let path = entry.path();
            if let Some(start) = segment::parse_start_address(&path) {
                let seg = Segment::open(path, layout)?;
                segments.insert(start, seg);
            }
        }

        let next_address_start = segments
            .keys()
            .next_back()
            .map(|&k| k + layout.max_pages_per_segment)
            .unwrap_or(0);

        Ok(Self {
            dir: cfg.file_directory.clone(),
            layout,
            extend_batch: cfg.extend_address_space_by_page_count.max(1),
            state: RwLock::new(HeapState { segments, next_address_start }),
        })
    }

    pub fn page_size(&self) -> u32 {
        self.layout.page_size
    }

    pub fn max_pages_per_segment(&self) -> u64 {
        self.layout.max_pages_per_segment
    }

    pub fn first(&self) -> u64 {
        self.state.read().expect("heap lock poisoned").first()
    }

    pub fn last(&self) -> Option<u64> {
        self.state.read().expect("heap lock poisoned").last()
    }

    pub fn segment_count(&self) -> usize {
        self.state.read().expect("heap lock poisoned").segments.len()
    }

    pub fn total_pages(&self) -> u64 {
        self.state.read().expect("heap lock poisoned").total_pages()
    }

    pub fn free_pages(&self) -> u64 {
        self.state.read().expect("heap lock poisoned").free_pages()
    }

    fn segment_key_for(&self, page: u64) -> u64 {
        (page / self.layout.max_pages_per_segment) * self.layout.max_pages_per_segment
    }

    /// Grow the address space by exactly `n` pages, filling the current
    /// tail segment before creating new ones (§4.2 "extend_by"). Each
    /// segment operation commits durably before the next begins, so a
    /// mid-call failure always leaves the heap's in-memory view equal to
    /// what is already on disk — no separate rollback bookkeeping needed.
    pub fn extend_by(&self, n: u64) -> Result<()> {
        let mut st = self.state.write().expect("heap lock poisoned");
        let mut remaining = n;
        while remaining > 0 {
            let tail_with_room = st
                .segments
                .iter()
                .next_back()
                .filter(|(_, seg)| seg.page_count() < seg.max_pages())
                .map(|(&k, _)| k);

            let key = match tail_with_room {
                Some(k) => k,
                None => {
                    let start = st.next_address_start;
                    let seg = Segment::create(&self.dir, start, self.layout)?;
                    st.next_address_start = start + self.layout.max_pages_per_segment;
                    st.segments.insert(start, seg);
                    start
                }
            };

            let seg = st.segments.get_mut(&key).expect("segment just located or created");
            let room = seg.max_pages() - seg.page_count();
            let take = remaining.min(room);
            seg.extend(take)?;
            remaining -= take;
            metrics::record_segment_extend();
        }
        Ok(())
    }

    /// Drop the top `n` pages, deleting whole trailing segments and
    /// truncating the one straddling segment if any (§4.2 "trim_head").
    pub fn trim_head(&self, n: u64) -> Result<()> {
        let mut st = self.state.write().expect("heap lock poisoned");
        let total = st.total_pages();
        if n > total {
            return Err(Error::OutOfBounds { page: n, first: 0, last: total });
        }
        let mut remaining = n;
        while remaining > 0 {
            let tail = st.segments.iter().next_back().map(|(&k, seg)| (k, seg.page_count()));
            let (key, seg_pages) = match tail {
                Some(t) => t,
                None => break,
            };
            if remaining >= seg_pages {
                let seg = st.segments.remove(&key).expect("key just read from the map");
                seg.delete()?;
                remaining -= seg_pages;
            } else {
                let seg = st.segments.get_mut(&key).expect("key just read from the map");
                seg.truncate_to(seg_pages - remaining)?;
                remaining = 0;
            }
            metrics::record_segment_trim();
        }
        Ok(())
    }

    /// Delete whole leading segments that fall entirely within the first
    /// `n` pages, advancing `first`. Never truncates mid-segment (§4.2
    /// "trim_tail"): a segment straddling the boundary is left untouched.
    pub fn trim_tail(&self, n: u64) -> Result<()> {
        let mut st = self.state.write().expect("heap lock poisoned");
        let mut remaining = n;
        loop {
            let head = st.segments.iter().next().map(|(&k, seg)| (k, seg.page_count()));
            let (key, seg_pages) = match head {
                Some(h) => h,
                None => break,
            };
            if seg_pages > remaining {
                break;
            }
            let seg = st.segments.remove(&key).expect("key just read from the map");
            seg.delete()?;
            remaining -= seg_pages;
            metrics::record_segment_trim();
        }
        Ok(())
    }

    /// Extend the address space by `extend_batch` pages at a time until at
    /// least `n` pages are free, satisfying an undersized `malloc` (§8 S4).
    fn auto_extend_for_shortfall(&self, n: u64) -> Result<()> {
        loop {
            let free = self.state.read().expect("heap lock poisoned").free_pages();
            if free >= n {
                return Ok(());
            }
            self.extend_by(self.extend_batch)?;
            metrics::record_malloc_auto_extended(self.extend_batch);
        }
    }

    /// Allocate `n` pages, draining free-lists segment by segment in
    /// ascending order, auto-extending first if the current total falls
    /// short (§4.2 "malloc", §8 S4). On a failure partway through, already
    /// -taken pages are returned to their segments in exactly reverse
    /// order before the error is surfaced.
    pub fn malloc(&self, n: u64) -> Result<Vec<u64>> {
        if self.state.read().expect("heap lock poisoned").free_pages() < n {
            self.auto_extend_for_shortfall(n)?;
        }

        let mut st = self.state.write().expect("heap lock poisoned");
        let total_free = st.free_pages();
        if total_free < n {
            return Err(Error::NotEnoughSpace { requested: n, available: total_free });
        }

        let mut acquired: Vec<(u64, Vec<u64>)> = Vec::new();
        let mut out = Vec::with_capacity(n as usize);
        let mut remaining = n;
        let keys: Vec<u64> = st.segments.keys().copied().collect();

        let result: Result<()> = (|| {
            for key in keys {
                if remaining == 0 {
                    break;
                }
                let seg = st.segments.get_mut(&key).expect("key collected from this map moments ago");
                if seg.free_count() == 0 {
                    continue;
                }
                let take = remaining.min(seg.free_count());
                match seg.get_pages(take) {
                    Ok(got) => {
                        remaining -= got.len() as u64;
                        for &idx in &got {
                            out.push(key + idx);
                        }
                        acquired.push((key, got));
                    }
                    Err((got, e)) => {
                        // Pages this segment already popped before its
                        // bitmap write failed still need to flow through
                        // the rewind below, or they'd leak (§4.6).
                        acquired.push((key, got));
                        return Err(e);
                    }
                }
            }
            Ok(())
        })();

        if result.is_err() || remaining > 0 {
            for (key, indices) in acquired.into_iter().rev() {
                if let Some(seg) = st.segments.get_mut(&key) {
                    let _ = seg.release_pages(&indices);
                }
            }
            return match result {
                Err(e) => Err(e),
                Ok(()) => Err(Error::NotEnoughSpace { requested: n, available: total_free }),
            };
        }

        metrics::record_malloc_from_freelist(out.len() as u64);
        Ok(out)
    }

    /// Release pages, grouped by owning segment. Pages outside any known
    /// segment are silently skipped, making `free` idempotent against
    /// already-trimmed ranges (§4.2 "free").
    pub fn free(&self, pages: &[u64]) -> Result<()> {
        let max = self.layout.max_pages_per_segment;
        let mut by_segment: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for &p in pages {
            let key = (p / max) * max;
            by_segment.entry(key).or_default().push(p - key);
        }

        let mut st = self.state.write().expect("heap lock poisoned");
        for (key, indices) in by_segment {
            if let Some(seg) = st.segments.get_mut(&key) {
                seg.release_pages(&indices)?;
            }
        }
        Ok(())
    }

    fn bounds_check(&self, st: &HeapState, p: u64) -> Result<()> {
        match st.last() {
            Some(last) if p >= st.first() && p <= last => Ok(()),
            Some(last) => Err(Error::OutOfBounds { page: p, first: st.first(), last }),
            None => Err(Error::OutOfBounds { page: p, first: st.first(), last: st.first() }),
        }
    }

    /// Positioned read at global page number `p` (§4.2 "read"). The heap
    /// lock is held only long enough to resolve the owning segment; the
    /// actual I/O runs outside it.
    pub fn read(&self, p: u64, buf: &mut [u8]) -> Result<()> {
        let st = self.state.read().expect("heap lock poisoned");
        self.bounds_check(&st, p)?;
        let key = self.segment_key_for(p);
        let seg = st.segments.get(&key).ok_or_else(|| Error::OutOfBounds {
            page: p,
            first: st.first(),
            last: st.last().unwrap_or(st.first()),
        })?;
        let offset = (p - key) * self.layout.page_size as u64;
        seg.read(offset, buf)
    }

    /// Positioned write at global page number `p` (§4.2 "write"), fsynced
    /// before returning.
    pub fn write(&self, p: u64, buf: &[u8]) -> Result<()> {
        let st = self.state.read().expect("heap lock poisoned");
        self.bounds_check(&st, p)?;
        let key = self.segment_key_for(p);
        let seg = st.segments.get(&key).ok_or_else(|| Error::OutOfBounds {
            page: p,
            first: st.first(),
            last: st.last().unwrap_or(st.first()),
        })?;
        let offset = (p - key) * self.layout.page_size as u64;
        seg.write(offset, buf)
    }

    /// `false` outside `[first, last]`; otherwise the segment's free-list bit.
    pub fn is_free(&self, p: u64) -> bool {
        let st = self.state.read().expect("heap lock poisoned");
        if self.bounds_check(&st, p).is_err() {
            return false;
        }
        let key = self.segment_key_for(p);
        match st.segments.get(&key) {
            Some(seg) => seg.is_free(p - key),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(dir: &std::path::Path) -> StoreConfig {
        StoreConfig::builder()
            .page_size_bytes(4096)
            .max_heap_file_size_bytes(6 * 4096)
            .file_directory(dir)
            .extend_address_space_by_page_count(5)
            .build()
    }

    #[test]
    fn s1_grow_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let heap = Heap::open(&cfg(dir.path())).unwrap();
            heap.extend_by(4).unwrap();
            assert_eq!((heap.first(), heap.last()), (0, Some(3)));
            assert_eq!(heap.segment_count(), 1);
        }
        let heap = Heap::open(&cfg(dir.path())).unwrap();
        assert_eq!((heap.first(), heap.last()), (0, Some(3)));
        assert_eq!(heap.segment_count(), 1);
        assert_eq!(heap.total_pages(), 4);
        assert_eq!(heap.free_pages(), 4);
    }

    #[test]
    fn s2_multi_segment_extend() {
        let dir = tempfile::tempdir().unwrap();
        let heap = Heap::open(&cfg(dir.path())).unwrap();
        heap.extend_by(4).unwrap();
        heap.extend_by(4).unwrap();
        assert_eq!(heap.segment_count(), 2);
        assert_eq!(heap.last(), Some(7));
        heap.extend_by(1).unwrap();
        assert_eq!(heap.segment_count(), 3);
        assert_eq!(heap.last(), Some(8));
        heap.extend_by(10).unwrap();
        assert_eq!(heap.segment_count(), 5);
        assert_eq!(heap.last(), Some(18));
    }

    #[test]
    fn s3_trim_head() {
        let dir = tempfile::tempdir().unwrap();
        let heap = Heap::open(&cfg(dir.path())).unwrap();
        heap.extend_by(4).unwrap();
        heap.extend_by(4).unwrap();
        heap.extend_by(1).unwrap();
        heap.extend_by(10).unwrap();
        heap.trim_head(10).unwrap();
        assert_eq!(heap.segment_count(), 3);
        assert_eq!(heap.last(), Some(8));
    }

    #[test]
    fn s4_allocate_write_free_read() {
        let dir = tempfile::tempdir().unwrap();
        let heap = Heap::open(&cfg(dir.path())).unwrap();
        heap.extend_by(4).unwrap();
        let got = heap.malloc(9).unwrap();
        assert_eq!(got, vec![0, 1, 2, 3, 4, 5, 6, 7, 8]);

        let mut buf = vec![0u8; 4096];
        buf[..11].copy_from_slice(b"Hello World");
        heap.write(4, &buf).unwrap();

        heap.free(&got).unwrap();
        assert_eq!(heap.free_pages(), 9);

        let mut readback = vec![0u8; 4096];
        heap.read(4, &mut readback).unwrap();
        assert_eq!(&readback[..11], b"Hello World");
    }

    #[test]
    fn trim_tail_only_drops_whole_leading_segments() {
        let dir = tempfile::tempdir().unwrap();
        let heap = Heap::open(&cfg(dir.path())).unwrap();
        heap.extend_by(4).unwrap();
        heap.extend_by(4).unwrap();
        heap.trim_tail(5).unwrap();
        assert_eq!(heap.segment_count(), 1);
        assert_eq!(heap.first(), 4);
    }

    #[test]
    fn free_of_out_of_range_page_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let heap = Heap::open(&cfg(dir.path())).unwrap();
        heap.extend_by(4).unwrap();
        heap.free(&[999]).unwrap();
    }

    #[test]
    fn read_outside_range_is_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let heap = Heap::open(&cfg(dir.path())).unwrap();
        heap.extend_by(1).unwrap();
        let mut buf = vec![0u8; 4096];
        assert!(matches!(heap.read(5, &mut buf), Err(Error::OutOfBounds { .. })));
    }
}
