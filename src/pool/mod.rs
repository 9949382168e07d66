//! pool — the write-back buffer pool sitting between callers and the heap
//! (§4.4 "Buffer pool"). Holds a bounded set of decoded page buffers,
//! coalesces writes, and runs two independently scheduled background
//! tasks: a flush ticker and an eviction ticker, each guarded so at most
//! one instance of itself is ever running (§9 "Background flushing").

pub mod lru;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::heap::Heap;
use crate::metrics;
use crate::page::Page;
use lru::LruIndex;

pub struct BufferPool {
    heap: Arc<Heap>,
    index: Mutex<LruIndex>,
    page_size: usize,
    page_meta_enabled: bool,
    lsn_counter: AtomicU32,
    stop: Arc<AtomicBool>,
    flush_busy: Arc<AtomicBool>,
    evict_busy: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl BufferPool {
    /// Build a pool over `heap` and start its background flush and
    /// eviction tickers. Destroying the returned handle stops both (§9
    /// "Global state": no process-wide singletons, everything scoped to
    /// the handle).
    pub fn new(heap: Arc<Heap>, cfg: &StoreConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            heap,
            index: Mutex::new(LruIndex::new(cfg.page_buffer_cache_size)),
            page_size: cfg.page_size_bytes as usize,
            page_meta_enabled: cfg.enable_page_meta,
            lsn_counter: AtomicU32::new(0),
            stop: Arc::new(AtomicBool::new(false)),
            flush_busy: Arc::new(AtomicBool::new(false)),
            evict_busy: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        });

        let flush_thread = spawn_ticker(
            Arc::downgrade(&pool),
            pool.stop.clone(),
            pool.flush_busy.clone(),
            Duration::from_millis(cfg.buffer_pool_flush_interval_ms.max(1)),
            |pool| pool.flush(),
        );
        let evict_thread = spawn_ticker(
            Arc::downgrade(&pool),
            pool.stop.clone(),
            pool.evict_busy.clone(),
            Duration::from_millis(cfg.buffer_pool_eviction_interval_ms.max(1)),
            |pool| pool.run_eviction(),
        );

        let mut threads = pool.threads.lock().expect("pool thread list lock poisoned");
        threads.push(flush_thread);
        threads.push(evict_thread);
        drop(threads);
        pool
    }

    pub fn next_lsn(&self) -> u32 {
        self.lsn_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Return the cached page, populating the cache from the heap on a
    /// miss (§4.4 "read_page").
    pub fn read_page(&self, p: u64) -> Result<Arc<Page>> {
        {
            let mut idx = self.index.lock().expect("lru lock poisoned");
            if let Some(page) = idx.get(p) {
                metrics::record_cache_hit();
                return Ok(page);
            }
        }
        metrics::record_cache_miss();
        let mut buf = vec![0u8; self.page_size];
        self.heap.read(p, &mut buf)?;
        let page = Arc::new(Page::from_bytes(p, self.page_size, self.page_meta_enabled, buf));
        let mut idx = self.index.lock().expect("lru lock poisoned");
        idx.put(p, page.clone());
        Ok(page)
    }

    /// Force a write-through of one page (§4.4 "flush_page"). A no-op if
    /// the page isn't dirty. `Page::flush_with` holds the page's own lock
    /// across the write and the dirty-bit clear, so a concurrent
    /// `set_page_buffer` can never land in between (§4.4, §9 "Per-page
    /// locks").
    pub fn flush_page(&self, page: &Arc<Page>) -> Result<()> {
        if page.flush_with(|bytes| self.heap.write(page.page_number(), bytes))? {
            metrics::record_flush_page_written();
        }
        Ok(())
    }

    /// Write through every dirty cached page. A per-page I/O failure is
    /// logged and that page's dirty bit is left set for the next flush;
    /// the call always visits the rest of the cache (§4.4 "flush").
    pub fn flush(&self) {
        let pages: Vec<Arc<Page>> = {
            let idx = self.index.lock().expect("lru lock poisoned");
            let mut out = Vec::with_capacity(idx.len());
            idx.for_each(|_, page| out.push(page.clone()));
            out
        };

        for page in pages {
            match page.flush_with(|bytes| self.heap.write(page.page_number(), bytes)) {
                Ok(true) => metrics::record_flush_page_written(),
                Ok(false) => {}
                Err(e) => {
                    log::warn!("flush of page {} failed: {}", page.page_number(), e);
                    metrics::record_flush_error();
                }
            }
        }
    }

    /// Evict clean pages from the LRU tail down to capacity. A dirty page
    /// is never evicted on this pass: instead its write is started right
    /// here (the spec's "asynchronous heap write" — this pool is
    /// synchronous throughout, so "started" means "run before the
    /// predicate returns"), and the predicate still answers false so the
    /// entry is retained and picked up again on the following tick if
    /// anything raced it dirty again in the meantime (§4.4 "Background
    /// tasks", §4.5 "flushing -> clean"). `flush_with` holds the page's
    /// own lock for the whole write-then-clear cycle, same as `flush`.
    fn run_eviction(&self) {
        let mut idx = self.index.lock().expect("lru lock poisoned");
        let evicted = idx.compact(|page| {
            match page.flush_with(|bytes| self.heap.write(page.page_number(), bytes)) {
                Ok(false) => true, // already clean: safe to evict
                Ok(true) => {
                    metrics::record_flush_page_written();
                    false // just flushed; retain this pass regardless
                }
                Err(e) => {
                    log::warn!("eviction-cycle write of page {} failed: {}", page.page_number(), e);
                    metrics::record_flush_error();
                    false
                }
            }
        });
        if evicted > 0 {
            metrics::record_eviction(evicted as u64);
        }
    }

    pub fn len(&self) -> usize {
        self.index.lock().expect("lru lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn spawn_ticker<F>(
    weak: std::sync::Weak<BufferPool>,
    stop: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    interval: Duration,
    action: F,
) -> JoinHandle<()>
where
    F: Fn(&BufferPool) + Send + 'static,
{
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            thread::sleep(interval);
            if stop.load(Ordering::Relaxed) {
                break;
            }
            // At-most-one concurrent instance of this tick: a still-running
            // previous tick causes this one to be skipped outright.
            if busy.swap(true, Ordering::Acquire) {
                continue;
            }
            if let Some(pool) = weak.upgrade() {
                action(&pool);
            } else {
                busy.store(false, Ordering::Release);
                break;
            }
            busy.store(false, Ordering::Release);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn cfg(dir: &std::path::Path) -> StoreConfig {
        StoreConfig::builder()
            .page_size_bytes(64)
            .max_heap_file_size_bytes(6 * 64)
            .file_directory(dir)
            .page_buffer_cache_size(2)
            .enable_page_meta(true)
            .buffer_pool_flush_interval_ms(60_000)
            .buffer_pool_eviction_interval_ms(60_000)
            .build()
    }

    #[test]
    fn s5_buffer_pool_coalescing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let heap = Arc::new(Heap::open(&cfg).unwrap());
        heap.extend_by(1).unwrap();
        let pool = BufferPool::new(heap.clone(), &cfg);

        let page = pool.read_page(0).unwrap();
        page.set_page_buffer(b"first", pool.next_lsn()).unwrap();
        page.set_page_buffer(b"second", pool.next_lsn()).unwrap();
        pool.flush();

        let mut on_disk = vec![0u8; 64];
        heap.read(0, &mut on_disk).unwrap();
        assert_eq!(&on_disk[8..14], b"second");
        assert!(Page::from_bytes(0, 64, true, on_disk).check_crc_match());
    }

    #[test]
    fn cache_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let heap = Arc::new(Heap::open(&cfg).unwrap());
        heap.extend_by(1).unwrap();
        let pool = BufferPool::new(heap, &cfg);

        let before = metrics::snapshot().cache_misses;
        let _ = pool.read_page(0).unwrap();
        let _ = pool.read_page(0).unwrap();
        let after = metrics::snapshot();
        assert_eq!(after.cache_misses, before + 1);
        assert!(after.cache_hits >= 1);
    }

    #[test]
    fn eviction_writes_through_dirty_pages_instead_of_dropping_them() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let heap = Arc::new(Heap::open(&cfg).unwrap());
        heap.extend_by(3).unwrap();
        let pool = BufferPool::new(heap.clone(), &cfg);

        let p0 = pool.read_page(0).unwrap();
        p0.set_page_buffer(b"dirty", 1).unwrap();
        let _p1 = pool.read_page(1).unwrap();
        let _p2 = pool.read_page(2).unwrap();

        pool.run_eviction();
        // A dirty candidate is never dropped outright; its write runs in
        // place during the eviction pass and the entry stays cached.
        assert!(!p0.is_dirty());
        assert!(pool.len() >= 1);

        let mut on_disk = vec![0u8; 64];
        heap.read(0, &mut on_disk).unwrap();
        assert_eq!(&on_disk[8..13], b"dirty");
    }
}
