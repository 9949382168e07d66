//! segment — a single on-disk segment ("heap file"): a metadata page, a
//! free-list bitmap region, and a run of data pages (§3 "Segment file",
//! §4.1). The heap owns an ordered collection of these; a segment holds no
//! back-pointer to its heap.

pub mod freelist;
pub mod meta;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

pub use freelist::FreeList;
pub use meta::SegmentMeta;

use crate::consts::{SEGMENT_FILE_PREFIX, SEGMENT_FILE_SEP};
use crate::error::{Error, Result};
use crate::util::fsync_parent_dir;

/// Fixed geometry shared by every segment in a store, derived once from
/// configuration (§6: "the realized cap rounds down to a multiple of page
/// size after subtracting metadata and free-list regions").
#[derive(Debug, Clone, Copy)]
pub struct SegmentLayout {
    pub page_size: u32,
    pub freelist_region_bytes: usize,
    pub max_pages_per_segment: u64,
}

impl SegmentLayout {
    pub fn compute(page_size: u32, max_heap_file_size_bytes: u64) -> Self {
        let ps = page_size as u64;
        let remaining = max_heap_file_size_bytes.saturating_sub(ps);
        let freelist_bytes_raw = div_ceil(remaining, 8 * ps);
        let freelist_region_bytes = div_ceil(freelist_bytes_raw, ps) * ps;
        let data_capacity_bytes = max_heap_file_size_bytes.saturating_sub(ps + freelist_region_bytes);
        let max_pages_per_segment = data_capacity_bytes / ps;
        Self {
            page_size,
            freelist_region_bytes: freelist_region_bytes as usize,
            max_pages_per_segment,
        }
    }

    /// Byte offset of the data region: one metadata page plus the bitmap region.
    pub fn data_offset(&self) -> u64 {
        self.page_size as u64 + self.freelist_region_bytes as u64
    }
}

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

pub fn segment_file_name(start_address: u64) -> String {
    format!("{}{}{}", SEGMENT_FILE_PREFIX, SEGMENT_FILE_SEP, start_address)
}

pub fn segment_file_path(dir: &Path, start_address: u64) -> PathBuf {
    dir.join(segment_file_name(start_address))
}

/// Recover the start address encoded in `heapFile-<startAddress>`.
pub fn parse_start_address(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let prefix = format!("{}{}", SEGMENT_FILE_PREFIX, SEGMENT_FILE_SEP);
    name.strip_prefix(prefix.as_str())?.parse::<u64>().ok()
}

#[cfg(unix)]
fn read_at(file: &File, pos: u64, buf: &mut [u8]) -> std::io::Result<()> {
    file.read_exact_at(buf, pos)
}

#[cfg(unix)]
fn write_at(file: &File, pos: u64, buf: &[u8]) -> std::io::Result<()> {
    file.write_all_at(buf, pos)
}

#[cfg(not(unix))]
fn read_at(file: &File, pos: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut f = file.try_clone()?;
    f.seek(SeekFrom::Start(pos))?;
    f.read_exact(buf)
}

#[cfg(not(unix))]
fn write_at(file: &File, pos: u64, buf: &[u8]) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    let mut f = file.try_clone()?;
    f.seek(SeekFrom::Start(pos))?;
    f.write_all(buf)
}

pub struct Segment {
    path: PathBuf,
    file: File,
    layout: SegmentLayout,
    meta: SegmentMeta,
    freelist: FreeList,
}

impl Segment {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn address_start(&self) -> u64 {
        self.meta.address_start
    }

    pub fn page_count(&self) -> u64 {
        self.meta.page_count as u64
    }

    pub fn max_pages(&self) -> u64 {
        self.layout.max_pages_per_segment
    }

    pub fn free_count(&self) -> u64 {
        self.freelist.free_count()
    }

    pub fn is_free(&self, idx: u64) -> bool {
        self.freelist.is_free(idx)
    }

    /// Create a brand new segment: the fixed prefix (metadata page + bitmap
    /// region) is established immediately, page count zero, metadata and
    /// bitmap written and fsynced (§4.1 "create").
    pub fn create(dir: &Path, start_address: u64, layout: SegmentLayout) -> Result<Self> {
        let path = segment_file_path(dir, start_address);
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(Error::Io)?;
        file.set_len(layout.data_offset()).map_err(Error::Io)?;

        let meta = SegmentMeta::new(start_address);
        let freelist = FreeList::new_empty(0);
        let mut seg = Self { path, file, layout, meta, freelist };
        seg.write_meta()?;
        seg.write_freelist()?;
        fsync_parent_dir(&seg.path)?;
        Ok(seg)
    }

    /// Open an existing segment file. A CRC-mismatched metadata page enters
    /// a size-based recovery path before giving up (§4.1 "open").
    pub fn open(path: PathBuf, layout: SegmentLayout) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path).map_err(Error::Io)?;

        let mut meta_buf = vec![0u8; layout.page_size as usize];
        read_at(&file, 0, &mut meta_buf).map_err(Error::Io)?;

        let meta = if SegmentMeta::verify_crc(&meta_buf) {
            let decoded = SegmentMeta::decode(&meta_buf);
            // Geometry that doesn't match the configured page size shows up here:
            // the metadata itself is self-consistent, but the physical file isn't
            // a whole number of pages past the fixed prefix.
            let physical_len = file.metadata().map_err(Error::Io)?.len();
            let fixed_prefix = layout.data_offset();
            if physical_len < fixed_prefix || (physical_len - fixed_prefix) % layout.page_size as u64 != 0 {
                return Err(Error::ConfigMismatch(format!(
                    "segment {} has physical size {} incompatible with page size {}",
                    path.display(),
                    physical_len,
                    layout.page_size
                )));
            }
            // A page count stamped under a larger max_pages_per_segment than
            // this open is configured with is a config contradiction, not
            // corruption — the metadata is internally consistent, it just
            // doesn't fit this geometry. Left unchecked this would make
            // `Heap::extend_by`'s `max_pages() - page_count()` underflow.
            if decoded.page_count as u64 > layout.max_pages_per_segment {
                return Err(Error::ConfigMismatch(format!(
                    "segment {} has page_count {} exceeding max_pages_per_segment {}",
                    path.display(),
                    decoded.page_count,
                    layout.max_pages_per_segment
                )));
            }
            decoded
        } else {
            let repaired = Self::repair_meta(&file, &path, &layout)?;
            write_at(&file, 0, &repaired.encode(layout.page_size as usize)).map_err(Error::Io)?;
            file.sync_all().map_err(Error::Io)?;
            repaired
        };

        let mut fl_buf = vec![0u8; layout.freelist_region_bytes];
        read_at(&file, layout.page_size as u64, &mut fl_buf).map_err(Error::Io)?;
        let freelist = FreeList::from_bitmap(fl_buf, meta.page_count as u64);

        let seg = Self { path, file, layout, meta, freelist };
        seg.truncate_physical_tail()?;
        Ok(seg)
    }

    /// Size-based recovery: the physical file must equal the fixed prefix
    /// plus a whole number of data pages; that count becomes the repaired
    /// page count. The address start is re-derived from the file name,
    /// which is never subject to the same corruption as the metadata page.
    fn repair_meta(file: &File, path: &Path, layout: &SegmentLayout) -> Result<SegmentMeta> {
        let address_start = parse_start_address(path).ok_or_else(|| Error::Corrupt {
            path: path.to_path_buf(),
            reason: "cannot recover address start from file name".into(),
        })?;
        let physical_len = file.metadata().map_err(Error::Io)?.len();
        let fixed_prefix = layout.data_offset();
        if physical_len < fixed_prefix {
            return Err(Error::Corrupt { path: path.to_path_buf(), reason: "file shorter than fixed prefix".into() });
        }
        let data_bytes = physical_len - fixed_prefix;
        if data_bytes % layout.page_size as u64 != 0 {
            return Err(Error::Corrupt { path: path.to_path_buf(), reason: "trailing bytes are not a whole page".into() });
        }
        let page_count = data_bytes / layout.page_size as u64;
        if page_count > layout.max_pages_per_segment {
            return Err(Error::Corrupt { path: path.to_path_buf(), reason: "recovered page count exceeds segment capacity".into() });
        }
        Ok(SegmentMeta { page_count: page_count as u32, address_start })
    }

    /// Erase any torn tail left by a crash between an extend's allocate and
    /// its metadata commit: the file must be exactly `metaSize + pageCount *
    /// PageSize` once metadata is trusted.
    fn truncate_physical_tail(&self) -> Result<()> {
        let expected = self.layout.data_offset() + self.meta.page_count as u64 * self.layout.page_size as u64;
        let actual = self.file.metadata().map_err(Error::Io)?.len();
        if actual != expected {
            self.file.set_len(expected).map_err(Error::Io)?;
        }
        Ok(())
    }

    /// Write and fsync an arbitrary candidate metadata value without
    /// touching `self.meta` — callers that are about to change the page
    /// count commit the new value this way first, and only update
    /// `self.meta` once this returns `Ok`, so a write/fsync failure never
    /// leaves the in-memory page count ahead of what's durable (§4.2
    /// "undoes in-memory pageCount so the address space reported matches
    /// persisted state").
    fn write_meta_value(&self, meta: &SegmentMeta) -> Result<()> {
        let buf = meta.encode(self.layout.page_size as usize);
        write_at(&self.file, 0, &buf).map_err(Error::Io)?;
        self.file.sync_all().map_err(Error::Io)
    }

    fn write_meta(&mut self) -> Result<()> {
        let meta = self.meta;
        self.write_meta_value(&meta)
    }

    fn write_freelist(&mut self) -> Result<()> {
        write_at(&self.file, self.layout.page_size as u64, self.freelist.bitmap_bytes()).map_err(Error::Io)?;
        self.file.sync_all().map_err(Error::Io)?;
        Ok(())
    }

    /// Grow by `n` pages. Metadata is committed and fsynced before the new
    /// pages are relied upon by any caller (§4.1 "extend").
    pub fn extend(&mut self, n: u64) -> Result<()> {
        let current = self.meta.page_count as u64;
        let new_count = current + n;
        if new_count > self.layout.max_pages_per_segment {
            return Err(Error::NotEnoughSpace {
                requested: n,
                available: self.layout.max_pages_per_segment - current,
            });
        }
        let new_len = self.layout.data_offset() + new_count * self.layout.page_size as u64;
        self.file.set_len(new_len).map_err(Error::Io)?;
        let candidate = SegmentMeta { page_count: new_count as u32, address_start: self.meta.address_start };
        self.write_meta_value(&candidate)?;
        self.meta.page_count = new_count as u32;
        self.freelist.grow(new_count);
        self.write_freelist()?;
        Ok(())
    }

    /// Shrink to exactly `n` pages. Metadata is written and fsynced first,
    /// so a crash cannot leave a metadata page count larger than the
    /// physical file (§4.1 "truncate_to"). `self.meta.page_count` is only
    /// updated once that write lands — if it fails, the in-memory page
    /// count still matches what's durable on disk.
    pub fn truncate_to(&mut self, n: u64) -> Result<()> {
        debug_assert!(n <= self.meta.page_count as u64);
        let candidate = SegmentMeta { page_count: n as u32, address_start: self.meta.address_start };
        self.write_meta_value(&candidate)?;
        self.meta.page_count = n as u32;
        let new_len = self.layout.data_offset() + n * self.layout.page_size as u64;
        self.file.set_len(new_len).map_err(Error::Io)?;
        self.freelist.shrink(n);
        self.write_freelist()?;
        Ok(())
    }

    /// Positioned read at an in-segment byte offset. Safe to call
    /// concurrently with other reads and writes on the same segment.
    pub fn read(&self, offset_in_segment: u64, into: &mut [u8]) -> Result<()> {
        let pos = self.layout.data_offset() + offset_in_segment;
        read_at(&self.file, pos, into).map_err(Error::Io)
    }

    /// Positioned write, fsynced before returning (§4.1 "write").
    pub fn write(&self, offset_in_segment: u64, from: &[u8]) -> Result<()> {
        let pos = self.layout.data_offset() + offset_in_segment;
        write_at(&self.file, pos, from).map_err(Error::Io)?;
        self.file.sync_all().map_err(Error::Io)
    }

    /// Pop up to `k` in-segment page indices from the free-list, rewriting
    /// the bitmap page(s) with fsync before returning (§4.3 "durability").
    /// If the bitmap write fails, the already-popped indices are returned
    /// alongside the error (rather than silently dropped) so the caller
    /// can roll them back into this segment's free-list — `Heap::malloc`
    /// needs them to reverse every segment it touched, including this one
    /// (§4.6 "Rewind: return already-taken pages ... in reverse order").
    pub fn get_pages(&mut self, k: u64) -> std::result::Result<Vec<u64>, (Vec<u64>, Error)> {
        let got = self.freelist.get_pages(k);
        if !got.is_empty() {
            if let Err(e) = self.write_freelist() {
                return Err((got, e));
            }
        }
        Ok(got)
    }

    /// Release in-segment page indices back to the free-list.
    pub fn release_pages(&mut self, indices: &[u64]) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }
        self.freelist.release_pages(indices)?;
        self.write_freelist()?;
        Ok(())
    }

    /// Delete this segment's file entirely (used by `trim_head`/`trim_tail`
    /// when a segment lies wholly within the discarded range).
    pub fn delete(self) -> Result<()> {
        std::fs::remove_file(&self.path).map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> SegmentLayout {
        SegmentLayout::compute(4096, 6 * 4096)
    }

    #[test]
    fn create_then_open_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout();
        {
            let mut seg = Segment::create(dir.path(), 0, layout).unwrap();
            seg.extend(4).unwrap();
            assert_eq!(seg.page_count(), 4);
        }
        let seg = Segment::open(segment_file_path(dir.path(), 0), layout).unwrap();
        assert_eq!(seg.page_count(), 4);
        assert_eq!(seg.free_count(), 4);
        assert_eq!(seg.address_start(), 0);
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout();
        let mut seg = Segment::create(dir.path(), 0, layout).unwrap();
        seg.extend(2).unwrap();
        seg.write(0, b"Hello World").unwrap();
        let mut buf = vec![0u8; 11];
        seg.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"Hello World");
    }

    #[test]
    fn malloc_then_free_restores_free_count() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout();
        let mut seg = Segment::create(dir.path(), 0, layout).unwrap();
        seg.extend(4).unwrap();
        let got = seg.get_pages(3).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(seg.free_count(), 1);
        seg.release_pages(&got).unwrap();
        assert_eq!(seg.free_count(), 4);
    }

    #[test]
    fn corrupted_crc_with_valid_size_is_repaired_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout();
        {
            let mut seg = Segment::create(dir.path(), 0, layout).unwrap();
            seg.extend(4).unwrap();
        }
        let path = segment_file_path(dir.path(), 0);
        // Zero the CRC slot, leaving the rest of the metadata page intact.
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = OpenOptions::new().write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(0)).unwrap();
            f.write_all(&[0u8; 4]).unwrap();
        }
        let seg = Segment::open(path, layout).unwrap();
        assert_eq!(seg.page_count(), 4);
        assert_eq!(seg.address_start(), 0);
    }

    #[test]
    fn truncate_to_shrinks_page_count_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout();
        let mut seg = Segment::create(dir.path(), 0, layout).unwrap();
        seg.extend(4).unwrap();
        seg.truncate_to(1).unwrap();
        assert_eq!(seg.page_count(), 1);
        assert_eq!(seg.free_count(), 1);
        let expected_len = layout.data_offset() + layout.page_size as u64;
        assert_eq!(seg.file.metadata().unwrap().len(), expected_len);
    }
}
