//! Targeted coverage for the numbered invariants that the per-module unit
//! tests don't already exercise end to end: address-space continuity,
//! free-list accounting, allocator exclusivity, durability across a
//! simulated restart, idempotent free, and CRC defense.

use std::collections::HashSet;
use std::sync::Arc;

use pagestore::{BufferPool, Heap, StoreConfig};

fn cfg(dir: &std::path::Path) -> StoreConfig {
    StoreConfig::builder()
        .page_size_bytes(512)
        .max_heap_file_size_bytes(8 * 512)
        .file_directory(dir)
        .extend_address_space_by_page_count(3)
        .build()
}

#[test]
fn address_space_is_contiguous_after_repeated_extends() {
    let dir = tempfile::tempdir().unwrap();
    let heap = Heap::open(&cfg(dir.path())).unwrap();
    for _ in 0..5 {
        heap.extend_by(1).unwrap();
    }
    assert_eq!(heap.first(), 0);
    assert_eq!(heap.last(), Some(4));
    assert_eq!(heap.total_pages(), 5);
}

#[test]
fn free_count_tracks_allocations_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let heap = Heap::open(&cfg(dir.path())).unwrap();
    heap.extend_by(6).unwrap();
    assert_eq!(heap.free_pages(), 6);

    let got = heap.malloc(4).unwrap();
    assert_eq!(heap.free_pages(), 2);

    heap.free(&got[..2]).unwrap();
    assert_eq!(heap.free_pages(), 4);

    heap.free(&got[2..]).unwrap();
    assert_eq!(heap.free_pages(), 6);
}

#[test]
fn allocator_never_hands_out_the_same_page_twice_without_an_intervening_free() {
    let dir = tempfile::tempdir().unwrap();
    let heap = Heap::open(&cfg(dir.path())).unwrap();
    heap.extend_by(6).unwrap();

    let first = heap.malloc(3).unwrap();
    let second = heap.malloc(3).unwrap();

    let mut seen: HashSet<u64> = HashSet::new();
    for p in first.iter().chain(second.iter()) {
        assert!(seen.insert(*p), "page {p} handed out twice without a free");
    }
}

#[test]
fn free_does_not_zero_the_page_contents() {
    let dir = tempfile::tempdir().unwrap();
    let heap = Heap::open(&cfg(dir.path())).unwrap();
    heap.extend_by(2).unwrap();
    let got = heap.malloc(1).unwrap();
    let page = got[0];

    let mut buf = vec![0u8; 512];
    buf[..4].copy_from_slice(b"data");
    heap.write(page, &buf).unwrap();
    heap.free(&[page]).unwrap();

    let mut readback = vec![0u8; 512];
    heap.read(page, &mut readback).unwrap();
    assert_eq!(&readback[..4], b"data");
}

#[test]
fn double_free_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let heap = Heap::open(&cfg(dir.path())).unwrap();
    heap.extend_by(2).unwrap();
    let got = heap.malloc(1).unwrap();

    heap.free(&got).unwrap();
    let after_first = heap.free_pages();
    heap.free(&got).unwrap();
    assert_eq!(heap.free_pages(), after_first);
}

#[test]
fn payload_survives_a_simulated_restart() {
    let dir = tempfile::tempdir().unwrap();
    let page_no;
    {
        let cfg = cfg(dir.path());
        let heap = Arc::new(Heap::open(&cfg).unwrap());
        heap.extend_by(2).unwrap();
        let pool = BufferPool::new(heap.clone(), &cfg);
        let got = heap.malloc(1).unwrap();
        page_no = got[0];
        let page = pool.read_page(page_no).unwrap();
        page.set_page_buffer(b"durable", pool.next_lsn()).unwrap();
        pool.flush();
    }

    // Fresh heap and pool over the same directory, as if the process
    // restarted after a clean shutdown.
    let cfg = cfg(dir.path());
    let heap = Arc::new(Heap::open(&cfg).unwrap());
    let pool = BufferPool::new(heap, &cfg);
    let page = pool.read_page(page_no).unwrap();
    let mut out = vec![0u8; 7];
    page.get_page_buffer(&mut out).unwrap();
    assert_eq!(&out, b"durable");
}

#[test]
fn a_single_flipped_payload_byte_is_caught_by_the_crc() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg(dir.path());
    let heap = Arc::new(Heap::open(&cfg).unwrap());
    heap.extend_by(1).unwrap();
    let pool = BufferPool::new(heap.clone(), &cfg);

    let page = pool.read_page(0).unwrap();
    page.set_page_buffer(b"untampered", pool.next_lsn()).unwrap();
    pool.flush();

    let mut bytes = vec![0u8; 512];
    heap.read(0, &mut bytes).unwrap();
    bytes[20] ^= 0x01;
    let reloaded = pagestore::Page::from_bytes(0, 512, true, bytes);
    assert!(!reloaded.check_crc_match());
}
