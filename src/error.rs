//! error — typed error kinds surfaced by the core (segment, heap, pool).
//!
//! Callers distinguish kinds by matching on the enum variant rather than by
//! inspecting a message, so `ErrNotEnoughSpace` (caller should extend and
//! retry) can be handled differently from `ErrCorrupt` (caller should give
//! up and report).

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Metadata CRC mismatch that size-based repair could not fix.
    #[error("segment metadata corrupt at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Any positioned read/write, allocate-range, or fsync failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// `malloc` could not satisfy the request from current free-lists.
    #[error("not enough free pages: requested {requested}, available {available}")]
    NotEnoughSpace { requested: u64, available: u64 },

    /// Page number outside `[first, last]`, or a buffer offset/length that
    /// exceeds the page payload.
    #[error("page {page} out of bounds (valid range {first}..={last})")]
    OutOfBounds { page: u64, first: u64, last: u64 },

    /// Operation issued after store shutdown.
    #[error("store is closed")]
    Closed,

    /// Opening with options that contradict an existing store's on-disk
    /// metadata (page size, etc).
    #[error("configuration conflicts with existing store: {0}")]
    ConfigMismatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
