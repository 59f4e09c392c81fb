//! The write cache façade.
//!
//! [`WriteCache`] validates keys, drives the segment pool and keeps the entry
//! index consistent with the bytes it points at. A put follows a fixed order:
//!
//! 1. Reserve space in the active segment (advancing once if it is full).
//! 2. Copy the payload into the reserved range.
//! 3. Publish the location in the index and raise the ledger's tail.
//!
//! Readers only discover locations through the index, so they never observe
//! a partially copied payload.

use crate::allocator::{HugepageSize, MemoryAllocator, MmapAllocator};
use crate::error::{Result, WriteCacheError};
use crate::index::EntryIndex;
use crate::location::EntryKey;
use crate::metrics::*;
use crate::pool::{SegmentLayout, SegmentPool};

/// An in-memory buffer of ledger entries in front of a durable store.
///
/// Writers append with [`put`](Self::put); readers look entries up with
/// [`get`](Self::get), [`get_last_entry`](Self::get_last_entry) and
/// [`has_entry`](Self::has_entry); a drain pass walks everything in key order
/// with [`for_each`](Self::for_each) and then calls [`clear`](Self::clear).
///
/// All methods except `clear` take `&self` and may be called from many
/// threads at once. Payloads are returned as slices borrowing the cache, and
/// `clear` takes `&mut self`, so no view can outlive its generation.
///
/// # Example
///
/// ```
/// use writecache::{HeapAllocator, WriteCache};
///
/// let cache = WriteCache::with_segment_size(&HeapAllocator, 1024, 64).unwrap();
/// assert!(cache.put(3, 8, b"value").unwrap());
/// assert!(cache.put(3, 1, b"other").unwrap());
///
/// assert_eq!(cache.get(3, 1).unwrap(), Some(&b"other"[..]));
/// assert_eq!(cache.get_last_entry(3).unwrap(), Some(&b"value"[..]));
/// assert!(!cache.has_entry(-1, -1));
/// ```
pub struct WriteCache {
    pool: SegmentPool,
    index: EntryIndex,
}

impl WriteCache {
    /// Create a cache with a single segment spanning `capacity` bytes.
    pub fn new<A>(allocator: &A, capacity: usize) -> Result<Self>
    where
        A: MemoryAllocator + ?Sized,
    {
        Self::with_layout(allocator, capacity, SegmentLayout::Single)
    }

    /// Create a cache split into `segment_count` equal segments.
    ///
    /// Each segment holds `capacity / segment_count` bytes; any remainder is
    /// left unused.
    pub fn with_segment_count<A>(
        allocator: &A,
        capacity: usize,
        segment_count: usize,
    ) -> Result<Self>
    where
        A: MemoryAllocator + ?Sized,
    {
        Self::with_layout(
            allocator,
            capacity,
            SegmentLayout::SegmentCount(segment_count),
        )
    }

    /// Create a cache with segments of at most `segment_size` bytes.
    ///
    /// The last segment holds whatever is left of `capacity`, so the whole
    /// capacity is usable.
    pub fn with_segment_size<A>(
        allocator: &A,
        capacity: usize,
        segment_size: usize,
    ) -> Result<Self>
    where
        A: MemoryAllocator + ?Sized,
    {
        Self::with_layout(
            allocator,
            capacity,
            SegmentLayout::MaxSegmentSize(segment_size),
        )
    }

    /// Create a cache with an explicit segment layout.
    pub fn with_layout<A>(allocator: &A, capacity: usize, layout: SegmentLayout) -> Result<Self>
    where
        A: MemoryAllocator + ?Sized,
    {
        let pool = SegmentPool::new(allocator, capacity, layout)?;
        BYTES_ALLOCATED.add(pool.capacity() as i64);

        tracing::info!(
            capacity = pool.capacity(),
            segments = pool.segment_count(),
            segment_size = pool.segment_size(),
            "write cache created"
        );

        Ok(Self {
            pool,
            index: EntryIndex::new(),
        })
    }

    /// Start building a cache with custom settings.
    pub fn builder() -> WriteCacheBuilder {
        WriteCacheBuilder::new()
    }

    /// Store `data` under `(ledger_id, entry_id)`.
    ///
    /// Returns `Ok(false)` if the cache has no room for the payload; the
    /// cache is left unchanged. Writing an existing key stores a fresh copy
    /// and retargets the key to it.
    ///
    /// # Errors
    ///
    /// [`WriteCacheError::InvalidKey`] if either id is negative.
    pub fn put(&self, ledger_id: i64, entry_id: i64, data: &[u8]) -> Result<bool> {
        let key = EntryKey::new(ledger_id, entry_id)?;
        PUT.increment();

        let Ok(len) = u32::try_from(data.len()) else {
            PUT_FULL.increment();
            return Ok(false);
        };

        let Some(location) = self.pool.reserve(len) else {
            PUT_FULL.increment();
            return Ok(false);
        };

        // SAFETY: the location was just reserved for this call alone
        unsafe { self.pool.write(location, data) };
        self.index.insert(key, location);

        PUT_BYTES.add(len as u64);
        Ok(true)
    }

    /// Look up the payload stored under `(ledger_id, entry_id)`.
    ///
    /// # Errors
    ///
    /// [`WriteCacheError::InvalidKey`] if either id is negative.
    pub fn get(&self, ledger_id: i64, entry_id: i64) -> Result<Option<&[u8]>> {
        let key = EntryKey::new(ledger_id, entry_id)?;
        GET.increment();

        let data = self
            .index
            .get(&key)
            .and_then(|location| self.pool.read(location));

        if data.is_some() {
            HIT.increment();
        } else {
            MISS.increment();
        }
        Ok(data)
    }

    /// Look up the payload with the highest entry id in `ledger_id`.
    ///
    /// # Errors
    ///
    /// [`WriteCacheError::InvalidKey`] if `ledger_id` is negative.
    pub fn get_last_entry(&self, ledger_id: i64) -> Result<Option<&[u8]>> {
        let ledger = validate_ledger(ledger_id)?;
        GET.increment();

        let data = self
            .index
            .last_entry(ledger)
            .and_then(|(_, location)| self.pool.read(location));

        if data.is_some() {
            HIT.increment();
        } else {
            MISS.increment();
        }
        Ok(data)
    }

    /// Whether an entry is cached under `(ledger_id, entry_id)`.
    ///
    /// Negative ids are never cached, so they yield `false`.
    pub fn has_entry(&self, ledger_id: i64, entry_id: i64) -> bool {
        EntryKey::checked(ledger_id, entry_id).is_some_and(|key| self.index.contains(&key))
    }

    /// Remove every entry of `ledger_id`, returning how many were removed.
    ///
    /// The payload bytes stay allocated until the next [`clear`](Self::clear).
    ///
    /// # Errors
    ///
    /// [`WriteCacheError::InvalidKey`] if `ledger_id` is negative.
    pub fn delete_ledger(&self, ledger_id: i64) -> Result<usize> {
        let ledger = validate_ledger(ledger_id)?;
        let removed = self.index.remove_ledger(ledger);

        DELETE_LEDGER.increment();
        DELETED_ENTRIES.add(removed as u64);
        tracing::debug!(ledger_id = ledger, removed, "deleted ledger");
        Ok(removed)
    }

    /// Visit every cached entry in `(ledger_id, entry_id)` order.
    ///
    /// Writers are not paused. Entries present for the whole walk are visited
    /// exactly once; entries added during the walk may or may not be. The
    /// first error returned by `visitor` stops the walk and is returned.
    pub fn for_each<F, E>(&self, mut visitor: F) -> std::result::Result<(), E>
    where
        F: FnMut(u64, u64, &[u8]) -> std::result::Result<(), E>,
    {
        for entry in self.iter() {
            visitor(entry.ledger_id, entry.entry_id, entry.data)?;
        }
        Ok(())
    }

    /// Iterate over cached entries in `(ledger_id, entry_id)` order.
    ///
    /// Same consistency as [`for_each`](Self::for_each). Calling `iter` again
    /// starts a fresh walk.
    pub fn iter(&self) -> impl Iterator<Item = EntryRef<'_>> + '_ {
        self.index.iter().filter_map(|(key, location)| {
            self.pool.read(location).map(|data| EntryRef {
                ledger_id: key.ledger_id(),
                entry_id: key.entry_id(),
                data,
            })
        })
    }

    /// Drop every entry and make the whole capacity available again.
    ///
    /// Starts a new generation. Taking `&mut self` guarantees no payload view
    /// from the old generation is still alive.
    pub fn clear(&mut self) {
        let entries = self.index.len();
        self.index.clear();
        self.pool.clear();

        CLEAR.increment();
        tracing::debug!(
            entries,
            generation = self.pool.generation(),
            "write cache cleared"
        );
    }

    /// Number of cached entries.
    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes consumed in the current generation.
    ///
    /// Includes space held by overwritten and deleted entries.
    pub fn size(&self) -> usize {
        self.pool.used_bytes()
    }

    /// Usable bytes across all segments.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.pool.segment_count()
    }

    /// Number of clears since construction.
    pub fn generation(&self) -> u64 {
        self.pool.generation()
    }

    /// Snapshot of this instance's occupancy.
    pub fn stats(&self) -> WriteCacheStats {
        WriteCacheStats {
            entries: self.index.len(),
            ledgers: self.index.ledger_count(),
            used_bytes: self.pool.used_bytes(),
            capacity: self.pool.capacity(),
            segments: self.pool.segment_count(),
            active_segment: self.pool.active_segment(),
            generation: self.pool.generation(),
        }
    }
}

impl Drop for WriteCache {
    fn drop(&mut self) {
        BYTES_ALLOCATED.sub(self.pool.capacity() as i64);
    }
}

impl std::fmt::Debug for WriteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCache")
            .field("pool", &self.pool)
            .field("entries", &self.index.len())
            .finish()
    }
}

fn validate_ledger(ledger_id: i64) -> Result<u64> {
    if ledger_id < 0 {
        return Err(WriteCacheError::InvalidKey {
            ledger_id,
            entry_id: 0,
        });
    }
    Ok(ledger_id as u64)
}

/// A cached entry yielded by [`WriteCache::iter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef<'a> {
    ledger_id: u64,
    entry_id: u64,
    data: &'a [u8],
}

impl<'a> EntryRef<'a> {
    /// The ledger id.
    pub fn ledger_id(&self) -> u64 {
        self.ledger_id
    }

    /// The entry id.
    pub fn entry_id(&self) -> u64 {
        self.entry_id
    }

    /// The composite key.
    pub fn key(&self) -> EntryKey {
        EntryKey::from_parts(self.ledger_id, self.entry_id)
    }

    /// The payload, borrowed from the cache.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// Point-in-time occupancy of a [`WriteCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCacheStats {
    /// Cached entries.
    pub entries: usize,
    /// Ledgers with at least one recorded entry.
    pub ledgers: usize,
    /// Bytes consumed in this generation, dead space included.
    pub used_bytes: usize,
    /// Usable bytes across all segments.
    pub capacity: usize,
    /// Number of segments.
    pub segments: usize,
    /// Segment currently receiving appends.
    pub active_segment: u32,
    /// Clears since construction.
    pub generation: u64,
}

impl WriteCacheStats {
    /// Fraction of capacity consumed, in `[0.0, 1.0]`.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.capacity as f64
    }
}

/// Builder for [`WriteCache`].
///
/// # Example
///
/// ```
/// use writecache::{HugepageSize, WriteCache};
///
/// let cache = WriteCache::builder()
///     .capacity(16 * 1024 * 1024)   // 16MB
///     .segment_size(1024 * 1024)    // 1MB segments
///     .hugepage_size(HugepageSize::None)
///     .build()
///     .expect("failed to build cache");
///
/// assert_eq!(cache.segment_count(), 16);
/// ```
pub struct WriteCacheBuilder {
    /// Total capacity in bytes.
    capacity: usize,

    /// How capacity is split into segments.
    layout: SegmentLayout,

    /// Hugepage preference for the default allocator.
    hugepage_size: HugepageSize,

    /// NUMA node for the default allocator (Linux only).
    numa_node: Option<u32>,

    /// Overrides the default mmap allocator.
    allocator: Option<Box<dyn MemoryAllocator>>,
}

impl Default for WriteCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteCacheBuilder {
    /// Create a new builder with default settings.
    ///
    /// Defaults:
    /// - Capacity: 64MB with 1MB segments
    /// - Regular pages, no NUMA binding
    pub fn new() -> Self {
        Self {
            capacity: 64 * 1024 * 1024,                         // 64MB
            layout: SegmentLayout::MaxSegmentSize(1024 * 1024), // 1MB
            hugepage_size: HugepageSize::None,
            numa_node: None,
            allocator: None,
        }
    }

    /// Set the total capacity in bytes.
    pub fn capacity(mut self, bytes: usize) -> Self {
        self.capacity = bytes;
        self
    }

    /// Use segments of at most `bytes` each (default: 1MB).
    pub fn segment_size(mut self, bytes: usize) -> Self {
        self.layout = SegmentLayout::MaxSegmentSize(bytes);
        self
    }

    /// Split capacity into `count` equal segments.
    pub fn segment_count(mut self, count: usize) -> Self {
        self.layout = SegmentLayout::SegmentCount(count);
        self
    }

    /// Use one segment spanning the whole capacity.
    pub fn single_segment(mut self) -> Self {
        self.layout = SegmentLayout::Single;
        self
    }

    /// Set the segment layout directly.
    pub fn layout(mut self, layout: SegmentLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the hugepage size preference.
    ///
    /// Ignored when a custom allocator is set.
    pub fn hugepage_size(mut self, size: HugepageSize) -> Self {
        self.hugepage_size = size;
        self
    }

    /// Bind cache memory to a NUMA node (Linux only).
    ///
    /// Ignored when a custom allocator is set.
    pub fn numa_node(mut self, node: u32) -> Self {
        self.numa_node = Some(node);
        self
    }

    /// Allocate cache memory from `allocator` instead of anonymous mmap.
    pub fn allocator<A>(mut self, allocator: A) -> Self
    where
        A: MemoryAllocator + 'static,
    {
        self.allocator = Some(Box::new(allocator));
        self
    }

    /// Build the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout is invalid or allocation fails.
    pub fn build(self) -> Result<WriteCache> {
        match self.allocator {
            Some(allocator) => WriteCache::with_layout(&*allocator, self.capacity, self.layout),
            None => {
                let mut allocator = MmapAllocator::new().hugepage_size(self.hugepage_size);
                if let Some(node) = self.numa_node {
                    allocator = allocator.numa_node(node);
                }
                WriteCache::with_layout(&allocator, self.capacity, self.layout)
            }
        }
    }
}

impl std::fmt::Debug for WriteCacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCacheBuilder")
            .field("capacity", &self.capacity)
            .field("layout", &self.layout)
            .field("hugepage_size", &self.hugepage_size)
            .field("numa_node", &self.numa_node)
            .field("custom_allocator", &self.allocator.is_some())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;

    fn cache(capacity: usize, segment_size: usize) -> WriteCache {
        WriteCache::with_segment_size(&HeapAllocator, capacity, segment_size)
            .expect("failed to create cache")
    }

    #[test]
    fn test_cache_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WriteCache>();
    }

    #[test]
    fn test_put_get() {
        let cache = cache(15, 8);
        assert!(cache.put(1, 1, b"value").unwrap());
        assert_eq!(cache.get(1, 1).unwrap(), Some(&b"value"[..]));
        assert_eq!(cache.count(), 1);
        assert_eq!(cache.size(), 5);
    }

    #[test]
    fn test_put_too_large() {
        let cache = cache(15, 8);
        assert!(!cache.put(0, 0, b"valuevaluevalue").unwrap());
        assert_eq!(cache.get(0, 0).unwrap(), None);
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_last_entry_out_of_order() {
        let cache = cache(1024, 8);
        assert!(cache.put(3, 8, b"value").unwrap());
        assert!(cache.put(3, 1, b"value").unwrap());
        assert!(cache.put(3, 2, b"value3").unwrap());
        assert_eq!(cache.get_last_entry(3).unwrap(), Some(&b"value"[..]));
        assert_eq!(cache.get(3, 2).unwrap(), Some(&b"value3"[..]));
    }

    #[test]
    fn test_invalid_keys() {
        let cache = cache(64, 64);
        assert!(cache.put(-1, 0, b"x").unwrap_err().is_invalid_key());
        assert!(cache.put(0, -1, b"x").unwrap_err().is_invalid_key());
        assert!(cache.get(-1, 0).unwrap_err().is_invalid_key());
        assert!(cache.get(0, -1).unwrap_err().is_invalid_key());
        assert!(cache.get_last_entry(-1).unwrap_err().is_invalid_key());
        assert!(cache.delete_ledger(-1).unwrap_err().is_invalid_key());
        assert!(!cache.has_entry(-1, -1));
        assert!(!cache.has_entry(0, -1));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_retargets() {
        let cache = cache(64, 64);
        assert!(cache.put(1, 1, b"first").unwrap());
        assert!(cache.put(1, 1, b"second").unwrap());
        assert_eq!(cache.get(1, 1).unwrap(), Some(&b"second"[..]));
        assert_eq!(cache.count(), 1);
        // The old copy is dead space
        assert_eq!(cache.size(), 11);
    }

    #[test]
    fn test_empty_payload() {
        let cache = cache(8, 8);
        assert!(cache.put(1, 1, b"").unwrap());
        assert_eq!(cache.get(1, 1).unwrap(), Some(&b""[..]));
        assert!(cache.has_entry(1, 1));
    }

    #[test]
    fn test_delete_ledger() {
        let cache = cache(1024, 64);
        for e in 0..5 {
            assert!(cache.put(1, e, b"one").unwrap());
            assert!(cache.put(2, e, b"two").unwrap());
        }
        assert_eq!(cache.delete_ledger(1).unwrap(), 5);
        assert_eq!(cache.delete_ledger(1).unwrap(), 0);
        assert_eq!(cache.delete_ledger(0).unwrap(), 0);

        for e in 0..5 {
            assert!(!cache.has_entry(1, e));
            assert!(cache.has_entry(2, e));
        }
        assert_eq!(cache.get_last_entry(1).unwrap(), None);
        assert_eq!(cache.get_last_entry(2).unwrap(), Some(&b"two"[..]));
    }

    #[test]
    fn test_for_each_propagates_error() {
        let cache = cache(1024, 64);
        for l in 0..4 {
            cache.put(l, 0, b"x").unwrap();
        }
        let mut seen = Vec::new();
        let result = cache.for_each(|ledger, _, _| {
            seen.push(ledger);
            if ledger == 1 { Err("stop") } else { Ok(()) }
        });
        assert_eq!(result, Err("stop"));
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn test_iter_yields_entry_refs() {
        let cache = cache(1024, 64);
        cache.put(2, 0, b"b").unwrap();
        cache.put(1, 9, b"a").unwrap();
        let entries: Vec<_> = cache.iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key(), EntryKey::from_parts(1, 9));
        assert_eq!(entries[0].data(), b"a");
        assert_eq!(entries[1].ledger_id(), 2);
        assert_eq!(entries[1].entry_id(), 0);
    }

    #[test]
    fn test_clear_starts_new_generation() {
        let mut cache = cache(16, 8);
        assert!(cache.put(1, 1, b"12345678").unwrap());
        assert!(cache.put(1, 2, b"12345678").unwrap());
        assert!(!cache.put(1, 3, b"1").unwrap());

        cache.clear();

        assert_eq!(cache.generation(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
        assert!(!cache.has_entry(1, 1));
        assert_eq!(cache.get_last_entry(1).unwrap(), None);
        assert!(cache.put(1, 3, b"1").unwrap());
        assert_eq!(cache.get(1, 3).unwrap(), Some(&b"1"[..]));
    }

    #[test]
    fn test_stats() {
        let cache = cache(32, 8);
        cache.put(1, 1, b"abcdef").unwrap();
        cache.put(2, 1, b"abcdef").unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.ledgers, 2);
        assert_eq!(stats.used_bytes, 12);
        assert_eq!(stats.capacity, 32);
        assert_eq!(stats.segments, 4);
        assert_eq!(stats.active_segment, 1);
        assert_eq!(stats.generation, 0);
        assert!((stats.utilization() - 0.375).abs() < f64::EPSILON);
    }

    #[test]
    fn test_constructors() {
        let single = WriteCache::new(&HeapAllocator, 100).unwrap();
        assert_eq!(single.segment_count(), 1);
        assert_eq!(single.capacity(), 100);

        let split = WriteCache::with_segment_count(&HeapAllocator, 100, 8).unwrap();
        assert_eq!(split.segment_count(), 8);
        assert_eq!(split.capacity(), 96);

        assert!(WriteCache::new(&HeapAllocator, 0).is_err());
        assert!(WriteCache::with_segment_count(&HeapAllocator, 100, 0).is_err());
        assert!(WriteCache::with_segment_size(&HeapAllocator, 100, 0).is_err());
    }

    #[test]
    fn test_builder_with_custom_allocator() {
        let cache = WriteCache::builder()
            .capacity(4096)
            .segment_count(4)
            .allocator(HeapAllocator)
            .build()
            .unwrap();
        assert_eq!(cache.segment_count(), 4);
        assert_eq!(cache.capacity(), 4096);
        assert!(cache.put(1, 1, &[7u8; 1024]).unwrap());
    }

    #[test]
    fn test_builder_default_allocator() {
        let cache = WriteCache::builder()
            .capacity(1024 * 1024)
            .single_segment()
            .build()
            .unwrap();
        assert_eq!(cache.segment_count(), 1);
        assert!(cache.put(0, 0, b"mmap").unwrap());
        assert_eq!(cache.get(0, 0).unwrap(), Some(&b"mmap"[..]));
    }
}
