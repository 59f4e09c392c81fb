//! writecache: segment-backed in-memory write buffer for ledger entries.
//!
//! This crate absorbs newly appended ledger entries in front of a durable
//! store and hands them back in key order for a background flush:
//!
//! - **Allocators**: `MmapAllocator` (hugepages, NUMA) and `HeapAllocator`
//! - **Segments**: fixed-capacity regions with a lock-free append cursor
//! - **Pool**: one allocation partitioned into segments, advanced in order
//! - **Index**: concurrent skip list from `(ledger_id, entry_id)` to location
//! - **Tail tracker**: highest entry id per ledger for last-entry lookups
//! - **Cache**: `WriteCache`, the public put/get/scan/delete surface
//!
//! # Architecture
//!
//! ```text
//!      put(ledger, entry, data)          get / get_last_entry / for_each
//!                |                                   |
//!                v                                   v
//!     +---------------------+  publish   +-----------------------+
//!     |    SegmentPool      | ---------> |      EntryIndex       |
//!     | reserve + copy      |  Location  | SkipMap<Key,Location> |
//!     +----------+----------+            | + per-ledger tails    |
//!                |                       +-----------------------+
//!                v
//!     +-------+-------+-------+-------+
//!     | seg 0 | seg 1 | seg 2 |  ...  |   single allocation
//!     +-------+-------+-------+-------+
//!         ^ active pointer only moves forward until clear()
//! ```
//!
//! # Drain cycle
//!
//! The cache never evicts. A consumer drains it by walking every entry with
//! [`WriteCache::for_each`], persisting them elsewhere, and then calling
//! [`WriteCache::clear`], which needs exclusive access. Writers keep going
//! during the drain by switching to a second cache instance.
//!
//! # Example
//!
//! ```
//! use writecache::{HeapAllocator, WriteCache};
//!
//! let mut cache = WriteCache::with_segment_size(&HeapAllocator, 4096, 1024)?;
//! cache.put(1, 0, b"hello")?;
//! cache.put(1, 1, b"world")?;
//!
//! let mut flushed = Vec::new();
//! cache.for_each(|ledger, entry, data| {
//!     flushed.push((ledger, entry, data.to_vec()));
//!     Ok::<_, std::io::Error>(())
//! })?;
//! assert_eq!(flushed.len(), 2);
//!
//! cache.clear();
//! assert!(cache.is_empty());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core types
mod error;
mod location;
mod sync;

// Memory
mod allocator;
mod pool;
mod segment;

// Index
mod index;
mod tail;

// Public surface
mod cache;
mod config;
pub mod metrics;

// Re-exports
pub use allocator::{
    AllocatedPageSize, Allocation, HeapAllocator, HugepageSize, MemoryAllocator, MmapAllocator,
};
pub use cache::{EntryRef, WriteCache, WriteCacheBuilder, WriteCacheStats};
pub use config::{HugepageConfig, WriteCacheConfig, deserialize_size, parse_size};
pub use error::{Result, WriteCacheError};
pub use location::{EntryKey, Location};
pub use pool::{SegmentLayout, SegmentPool};
pub use segment::Segment;
