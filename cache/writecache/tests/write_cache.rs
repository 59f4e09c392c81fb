//! Behavioral tests for WriteCache.
//!
//! These drive the public API only: key validation, capacity boundaries,
//! last-entry lookups, ledger deletion and ordered enumeration.

#![cfg(not(feature = "loom"))]

use writecache::{HeapAllocator, MmapAllocator, WriteCache, WriteCacheError};

fn create_cache(capacity: usize, segment_size: usize) -> WriteCache {
    WriteCache::with_segment_size(&HeapAllocator, capacity, segment_size)
        .expect("Failed to create cache")
}

/// Collect every (ledger, entry) pair in enumeration order.
fn keys(cache: &WriteCache) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    cache
        .for_each(|ledger, entry, _| {
            out.push((ledger, entry));
            Ok::<_, WriteCacheError>(())
        })
        .expect("visitor failed");
    out
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_small_cache_put_get() {
    let cache = create_cache(15, 8);
    assert!(cache.put(1, 1, b"value").unwrap());
    assert_eq!(cache.get(1, 1).unwrap(), Some(&b"value"[..]));
}

#[test]
fn test_small_cache_rejects_oversized_entry() {
    let cache = create_cache(15, 8);
    assert!(!cache.put(0, 0, b"valuevaluevalue").unwrap());
    assert_eq!(cache.get(0, 0).unwrap(), None);
    assert!(!cache.put(0, 0, b"valuevalue").unwrap());
    assert!(!cache.has_entry(0, 0));
}

#[test]
fn test_capacity_smaller_than_segment_size() {
    let cache = create_cache(5, 8);
    assert_eq!(cache.segment_count(), 1);
    assert!(cache.put(1, 1, b"value").unwrap());
    assert!(!cache.put(1, 2, b"v").unwrap());
}

#[test]
fn test_last_entry_with_out_of_order_writes() {
    let cache = create_cache(1024, 8);
    assert!(cache.put(3, 8, b"value").unwrap());
    assert!(cache.put(3, 1, b"value").unwrap());
    assert!(cache.put(3, 2, b"value3").unwrap());

    assert_eq!(cache.get_last_entry(3).unwrap(), Some(&b"value"[..]));
    assert_eq!(cache.get(3, 2).unwrap(), Some(&b"value3"[..]));
}

#[test]
fn test_delete_ledger_validation() {
    let cache = create_cache(1024, 64);
    let err = cache.delete_ledger(-1).unwrap_err();
    assert!(matches!(
        err,
        WriteCacheError::InvalidKey { ledger_id: -1, .. }
    ));
    assert_eq!(cache.delete_ledger(0).unwrap(), 0);
}

#[test]
fn test_has_entry_on_fresh_cache() {
    let cache = create_cache(1024, 64);
    assert!(!cache.has_entry(-1, -1));
    assert!(!cache.has_entry(0, 0));
}

#[test]
fn test_for_each_after_delete_and_reinsert() {
    let cache = create_cache(1024, 64);
    assert!(cache.put(1, 1, b"one").unwrap());
    assert!(cache.put(2, 2, b"two").unwrap());
    assert_eq!(keys(&cache), vec![(1, 1), (2, 2)]);

    cache.delete_ledger(1).unwrap();
    for id in [8, 6, 7] {
        assert!(cache.put(id, id, b"new").unwrap());
    }

    assert_eq!(keys(&cache), vec![(2, 2), (6, 6), (7, 7), (8, 8)]);
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_negative_keys_rejected() {
    let cache = create_cache(1024, 64);
    for (ledger, entry) in [(-1, 0), (0, -1), (-1, -1), (i64::MIN, 5)] {
        assert!(cache.put(ledger, entry, b"x").unwrap_err().is_invalid_key());
        assert!(cache.get(ledger, entry).unwrap_err().is_invalid_key());
        assert!(!cache.has_entry(ledger, entry));
    }
    assert!(cache.get_last_entry(-5).unwrap_err().is_invalid_key());
    assert!(cache.delete_ledger(i64::MIN).unwrap_err().is_invalid_key());
    assert!(cache.is_empty());
}

#[test]
fn test_round_trip_boundary_ids() {
    let cache = create_cache(1024, 64);
    assert!(cache.put(0, 0, b"zero").unwrap());
    assert!(cache.put(i64::MAX, i64::MAX, b"max").unwrap());

    assert_eq!(cache.get(0, 0).unwrap(), Some(&b"zero"[..]));
    assert_eq!(cache.get(i64::MAX, i64::MAX).unwrap(), Some(&b"max"[..]));
    assert_eq!(cache.get_last_entry(i64::MAX).unwrap(), Some(&b"max"[..]));
    assert_eq!(keys(&cache), vec![(0, 0), (i64::MAX as u64, i64::MAX as u64)]);
}

#[test]
fn test_full_single_segment_keeps_contents() {
    let cache = WriteCache::new(&HeapAllocator, 32).unwrap();
    assert!(cache.put(1, 0, &[1u8; 20]).unwrap());
    assert!(cache.put(1, 1, &[2u8; 10]).unwrap());

    // 2 bytes left
    assert!(!cache.put(1, 2, &[3u8; 3]).unwrap());
    assert!(!cache.put(2, 0, &[3u8; 3]).unwrap());

    assert_eq!(cache.get(1, 0).unwrap(), Some(&[1u8; 20][..]));
    assert_eq!(cache.get(1, 1).unwrap(), Some(&[2u8; 10][..]));
    assert_eq!(cache.get_last_entry(1).unwrap(), Some(&[2u8; 10][..]));
    assert_eq!(cache.count(), 2);
    assert_eq!(cache.size(), 30);

    assert!(cache.put(1, 2, &[3u8; 2]).unwrap());
    assert_eq!(cache.size(), 32);
}

#[test]
fn test_last_entry_missing_ledger() {
    let cache = create_cache(1024, 64);
    cache.put(1, 5, b"a").unwrap();
    cache.put(3, 5, b"c").unwrap();
    assert_eq!(cache.get_last_entry(2).unwrap(), None);
    assert_eq!(cache.get_last_entry(0).unwrap(), None);
    assert_eq!(cache.get_last_entry(4).unwrap(), None);
}

#[test]
fn test_delete_ledger_is_total() {
    let cache = create_cache(64 * 1024, 1024);
    for entry in 0..100 {
        cache.put(5, entry, b"five").unwrap();
        cache.put(4, entry, b"four").unwrap();
        cache.put(6, entry, b"six").unwrap();
    }

    assert_eq!(cache.delete_ledger(5).unwrap(), 100);

    for entry in 0..100 {
        assert!(!cache.has_entry(5, entry));
        assert!(cache.has_entry(4, entry));
        assert!(cache.has_entry(6, entry));
    }
    assert_eq!(cache.get_last_entry(5).unwrap(), None);
    assert_eq!(cache.get_last_entry(4).unwrap(), Some(&b"four"[..]));
    assert_eq!(cache.get_last_entry(6).unwrap(), Some(&b"six"[..]));
    assert_eq!(cache.count(), 200);
}

#[test]
fn test_delete_then_rewrite_ledger() {
    let cache = create_cache(1024, 64);
    cache.put(1, 10, b"old").unwrap();
    cache.delete_ledger(1).unwrap();
    cache.put(1, 2, b"new").unwrap();

    // The old tail must not leak through
    assert_eq!(cache.get_last_entry(1).unwrap(), Some(&b"new"[..]));
}

#[test]
fn test_overwrite_keeps_newest() {
    let cache = create_cache(1024, 64);
    cache.put(1, 1, b"first").unwrap();
    cache.put(1, 1, b"second").unwrap();
    cache.put(1, 1, b"third").unwrap();

    assert_eq!(cache.get(1, 1).unwrap(), Some(&b"third"[..]));
    assert_eq!(keys(&cache), vec![(1, 1)]);
    assert_eq!(cache.size(), 16);
}

#[test]
fn test_clear_reclaims_space() {
    let mut cache = create_cache(64, 16);
    let mut entry = 0;
    while cache.put(1, entry, &[0xab; 10]).unwrap() {
        entry += 1;
    }
    assert_eq!(entry, 4);

    cache.clear();

    assert_eq!(cache.generation(), 1);
    assert!(keys(&cache).is_empty());
    for entry in 0..4 {
        assert!(cache.put(2, entry, &[0xcd; 10]).unwrap());
    }
    assert_eq!(cache.get(2, 3).unwrap(), Some(&[0xcd; 10][..]));
    assert!(!cache.has_entry(1, 0));
}

#[test]
fn test_visitor_error_propagates() {
    #[derive(Debug, PartialEq)]
    struct Abort(u64);

    let cache = create_cache(1024, 64);
    for ledger in 0..10 {
        cache.put(ledger, 0, b"x").unwrap();
    }

    let mut visited = 0;
    let result = cache.for_each(|ledger, _, _| {
        visited += 1;
        if ledger == 4 { Err(Abort(ledger)) } else { Ok(()) }
    });

    assert_eq!(result, Err(Abort(4)));
    assert_eq!(visited, 5);
}

#[test]
fn test_iter_is_restartable() {
    let cache = create_cache(1024, 64);
    for ledger in [3, 1, 2] {
        cache.put(ledger, 0, b"x").unwrap();
    }

    let first: Vec<_> = cache.iter().map(|e| e.ledger_id()).collect();
    let second: Vec<_> = cache.iter().map(|e| e.ledger_id()).collect();
    assert_eq!(first, vec![1, 2, 3]);
    assert_eq!(first, second);
}

#[test]
fn test_mmap_backed_cache() {
    let allocator = MmapAllocator::new();
    let cache = WriteCache::with_segment_count(&allocator, 4 * 1024 * 1024, 4).unwrap();
    assert_eq!(cache.segment_count(), 4);

    let payload: Vec<u8> = (0..4096).map(|i| i as u8).collect();
    for entry in 0..100 {
        assert!(cache.put(9, entry, &payload).unwrap());
    }
    for entry in 0..100 {
        assert_eq!(cache.get(9, entry).unwrap(), Some(&payload[..]));
    }
}
