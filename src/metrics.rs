//! metrics — process-wide atomic counters for the buffer pool, heap, and
//! segment subsystems. No export surface here (that belongs to whatever
//! facade embeds this crate); just the counters and their accessors, in the
//! same free-function-over-static-atomics shape the teacher uses.

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Buffer pool -----
static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static CACHE_MISSES: AtomicU64 = AtomicU64::new(0);
static FLUSH_PAGES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static FLUSH_ERRORS: AtomicU64 = AtomicU64::new(0);
static EVICTION_PAGES_EVICTED: AtomicU64 = AtomicU64::new(0);

// ----- Heap / segment -----
static SEGMENT_EXTENDS: AtomicU64 = AtomicU64::new(0);
static SEGMENT_TRIMS: AtomicU64 = AtomicU64::new(0);
static MALLOC_FROM_FREELIST: AtomicU64 = AtomicU64::new(0);
static MALLOC_AUTO_EXTENDED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub flush_pages_written: u64,
    pub flush_errors: u64,
    pub eviction_pages_evicted: u64,
    pub segment_extends: u64,
    pub segment_trims: u64,
    pub malloc_from_freelist: u64,
    pub malloc_auto_extended: u64,
}

impl MetricsSnapshot {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[inline]
pub fn record_cache_hit() {
    CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_cache_miss() {
    CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_flush_page_written() {
    FLUSH_PAGES_WRITTEN.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_flush_error() {
    FLUSH_ERRORS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_eviction(count: u64) {
    EVICTION_PAGES_EVICTED.fetch_add(count, Ordering::Relaxed);
}
#[inline]
pub fn record_segment_extend() {
    SEGMENT_EXTENDS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_segment_trim() {
    SEGMENT_TRIMS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_malloc_from_freelist(count: u64) {
    MALLOC_FROM_FREELIST.fetch_add(count, Ordering::Relaxed);
}
#[inline]
pub fn record_malloc_auto_extended(count: u64) {
    MALLOC_AUTO_EXTENDED.fetch_add(count, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        cache_hits: CACHE_HITS.load(Ordering::Relaxed),
        cache_misses: CACHE_MISSES.load(Ordering::Relaxed),
        flush_pages_written: FLUSH_PAGES_WRITTEN.load(Ordering::Relaxed),
        flush_errors: FLUSH_ERRORS.load(Ordering::Relaxed),
        eviction_pages_evicted: EVICTION_PAGES_EVICTED.load(Ordering::Relaxed),
        segment_extends: SEGMENT_EXTENDS.load(Ordering::Relaxed),
        segment_trims: SEGMENT_TRIMS.load(Ordering::Relaxed),
        malloc_from_freelist: MALLOC_FROM_FREELIST.load(Ordering::Relaxed),
        malloc_auto_extended: MALLOC_AUTO_EXTENDED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    CACHE_HITS.store(0, Ordering::Relaxed);
    CACHE_MISSES.store(0, Ordering::Relaxed);
    FLUSH_PAGES_WRITTEN.store(0, Ordering::Relaxed);
    FLUSH_ERRORS.store(0, Ordering::Relaxed);
    EVICTION_PAGES_EVICTED.store(0, Ordering::Relaxed);
    SEGMENT_EXTENDS.store(0, Ordering::Relaxed);
    SEGMENT_TRIMS.store(0, Ordering::Relaxed);
    MALLOC_FROM_FREELIST.store(0, Ordering::Relaxed);
    MALLOC_AUTO_EXTENDED.store(0, Ordering::Relaxed);
}
