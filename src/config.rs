//! Centralized configuration and builder for the store.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering them through
//!   open-time arguments.
//! - Provide a fluent `StoreConfigBuilder` that returns a `StoreConfig`,
//!   which `Heap::open`/`BufferPool::new` consume.
//!
//! Usage:
//!   let cfg = StoreConfig::builder()
//!       .page_size_bytes(4096)
//!       .max_heap_file_size_bytes(64 * 1024 * 1024)
//!       .file_directory("/var/lib/store")
//!       .build();

use std::fmt;
use std::path::PathBuf;

/// Top-level configuration for a store. Immutable for the lifetime of an
/// open store (§6): changing `page_size_bytes` against an existing segment's
/// metadata is a hard error, not a silent override.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Page size in bytes.
    pub page_size_bytes: u32,

    /// Segment file cap; the realized cap rounds down to a multiple of page
    /// size after subtracting the metadata and free-list regions.
    pub max_heap_file_size_bytes: u64,

    /// Directory holding segment files.
    pub file_directory: PathBuf,

    /// Buffer-pool soft capacity, in pages.
    pub page_buffer_cache_size: usize,

    /// Flush ticker period.
    pub buffer_pool_flush_interval_ms: u64,

    /// Eviction ticker period.
    pub buffer_pool_eviction_interval_ms: u64,

    /// Whether the 8-byte CRC+LSN page header is active.
    pub enable_page_meta: bool,

    /// Batch size for auto-extension when `malloc` sees a shortfall.
    pub extend_address_space_by_page_count: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size_bytes: crate::consts::DEFAULT_PAGE_SIZE,
            max_heap_file_size_bytes: 64 * 1024 * 1024,
            file_directory: PathBuf::from("."),
            page_buffer_cache_size: 1024,
            buffer_pool_flush_interval_ms: 200,
            buffer_pool_eviction_interval_ms: 500,
            enable_page_meta: true,
            extend_address_space_by_page_count: 1024,
        }
    }
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::new()
    }

    /// Fluent setters to override specific fields on an existing config.
    pub fn with_page_size_bytes(mut self, bytes: u32) -> Self {
        self.page_size_bytes = bytes;
        self
    }

    pub fn with_max_heap_file_size_bytes(mut self, bytes: u64) -> Self {
        self.max_heap_file_size_bytes = bytes;
        self
    }

    pub fn with_file_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_directory = dir.into();
        self
    }

    pub fn with_page_buffer_cache_size(mut self, pages: usize) -> Self {
        self.page_buffer_cache_size = pages;
        self
    }

    pub fn with_enable_page_meta(mut self, on: bool) -> Self {
        self.enable_page_meta = on;
        self
    }
}

/// Lightweight builder that produces a `StoreConfig`.
#[derive(Clone, Debug, Default)]
pub struct StoreConfigBuilder {
    cfg: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self { cfg: StoreConfig::default() }
    }

    pub fn page_size_bytes(mut self, bytes: u32) -> Self {
        self.cfg.page_size_bytes = bytes;
        self
    }

    pub fn max_heap_file_size_bytes(mut self, bytes: u64) -> Self {
        self.cfg.max_heap_file_size_bytes = bytes;
        self
    }

    pub fn file_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cfg.file_directory = dir.into();
        self
    }

    pub fn page_buffer_cache_size(mut self, pages: usize) -> Self {
        self.cfg.page_buffer_cache_size = pages;
        self
    }

    pub fn buffer_pool_flush_interval_ms(mut self, ms: u64) -> Self {
        self.cfg.buffer_pool_flush_interval_ms = ms;
        self
    }

    pub fn buffer_pool_eviction_interval_ms(mut self, ms: u64) -> Self {
        self.cfg.buffer_pool_eviction_interval_ms = ms;
        self
    }

    pub fn enable_page_meta(mut self, on: bool) -> Self {
        self.cfg.enable_page_meta = on;
        self
    }

    pub fn extend_address_space_by_page_count(mut self, pages: u64) -> Self {
        self.cfg.extend_address_space_by_page_count = pages;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> StoreConfig {
        self.cfg
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreConfig {{ page_size_bytes: {}, max_heap_file_size_bytes: {}, file_directory: {}, page_buffer_cache_size: {}, enable_page_meta: {} }}",
            self.page_size_bytes,
            self.max_heap_file_size_bytes,
            self.file_directory.display(),
            self.page_buffer_cache_size,
            self.enable_page_meta
        )
    }
}
