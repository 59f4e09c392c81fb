//! Process-wide write cache counters.
//!
//! Counters are registered with `metriken` and shared by every cache instance
//! in the process. Per-instance figures are available from
//! [`WriteCache::stats`](crate::WriteCache::stats).

use metriken::{Counter, Gauge, metric};

/// Put calls with a valid key.
#[metric(name = "writecache_put", description = "Total put operations")]
pub static PUT: Counter = Counter::new();

/// Puts that found no room.
#[metric(
    name = "writecache_put_full",
    description = "Puts rejected because the cache was full"
)]
pub static PUT_FULL: Counter = Counter::new();

/// Payload bytes stored.
#[metric(
    name = "writecache_put_bytes",
    description = "Payload bytes accepted by put"
)]
pub static PUT_BYTES: Counter = Counter::new();

/// Point and last-entry lookups.
#[metric(name = "writecache_get", description = "Total get operations")]
pub static GET: Counter = Counter::new();

/// Lookups that returned a payload.
#[metric(name = "writecache_hit", description = "Gets that found an entry")]
pub static HIT: Counter = Counter::new();

/// Lookups that returned nothing.
#[metric(name = "writecache_miss", description = "Gets that found nothing")]
pub static MISS: Counter = Counter::new();

/// Ledger deletions.
#[metric(
    name = "writecache_delete_ledger",
    description = "Total delete_ledger operations"
)]
pub static DELETE_LEDGER: Counter = Counter::new();

/// Entries removed by ledger deletions.
#[metric(
    name = "writecache_deleted_entries",
    description = "Index entries removed by delete_ledger"
)]
pub static DELETED_ENTRIES: Counter = Counter::new();

/// Whole-cache clears.
#[metric(name = "writecache_clear", description = "Total clear operations")]
pub static CLEAR: Counter = Counter::new();

/// Active segment advances.
#[metric(
    name = "writecache_segment_advance",
    description = "Times the active segment moved forward"
)]
pub static SEGMENT_ADVANCES: Counter = Counter::new();

/// Bytes of backing memory held by live caches.
#[metric(
    name = "writecache_bytes_allocated",
    description = "Backing memory held by live write caches"
)]
pub static BYTES_ALLOCATED: Gauge = Gauge::new();
