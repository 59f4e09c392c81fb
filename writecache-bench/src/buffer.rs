//! Double-buffered write cache.
//!
//! Writers append to the *active* cache under a shared lock. A drain flips
//! the active index, then takes the exclusive lock on the retired cache. The
//! exclusive lock is granted only after every writer that picked up the old
//! index has finished, so `for_each` and `clear` never race with a reader
//! holding a payload view.

use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use writecache::{WriteCache, WriteCacheConfig, WriteCacheError, WriteCacheStats};

pub struct DoubleBuffer {
    caches: [RwLock<WriteCache>; 2],
    active: AtomicUsize,
    drain_requested: Mutex<bool>,
    drain_wakeup: Condvar,
}

/// Outcome of one drain cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainReport {
    pub buffer: usize,
    pub entries: usize,
    pub bytes: usize,
    pub generation: u64,
}

impl DoubleBuffer {
    pub fn new(config: &WriteCacheConfig) -> Result<Self, WriteCacheError> {
        Ok(Self {
            caches: [RwLock::new(config.build()?), RwLock::new(config.build()?)],
            active: AtomicUsize::new(0),
            drain_requested: Mutex::new(false),
            drain_wakeup: Condvar::new(),
        })
    }

    /// Run `f` against the active cache.
    pub fn with_active<R>(&self, f: impl FnOnce(&WriteCache) -> R) -> R {
        let index = self.active.load(Ordering::Acquire);
        let cache = self.caches[index].read();
        f(&cache)
    }

    /// Look an entry up in the active cache, then in the retired one.
    ///
    /// The retired cache is skipped while it is being drained.
    pub fn lookup<R>(&self, f: impl Fn(&WriteCache) -> Option<R>) -> Option<R> {
        let index = self.active.load(Ordering::Acquire);
        if let Some(found) = f(&self.caches[index].read()) {
            return Some(found);
        }
        self.caches[index ^ 1].try_read().and_then(|cache| f(&cache))
    }

    /// Apply `f` to both caches.
    pub fn for_both(&self, mut f: impl FnMut(&WriteCache)) {
        for cache in &self.caches {
            f(&cache.read());
        }
    }

    /// Occupancy of the active cache.
    pub fn active_stats(&self) -> WriteCacheStats {
        self.with_active(|cache| cache.stats())
    }

    /// Ask the drain thread to run as soon as possible.
    pub fn request_drain(&self) {
        let mut requested = self.drain_requested.lock();
        if !*requested {
            *requested = true;
            self.drain_wakeup.notify_one();
        }
    }

    /// Block until a drain is requested or `timeout` passes. Returns whether
    /// a request was pending, and resets it.
    pub fn wait_for_request(&self, timeout: Duration) -> bool {
        let mut requested = self.drain_requested.lock();
        if !*requested {
            self.drain_wakeup.wait_for(&mut requested, timeout);
        }
        std::mem::take(&mut *requested)
    }

    /// Retire the active cache, feed every entry to `visitor` in key order,
    /// then clear it.
    ///
    /// If the visitor fails the retired cache keeps its entries and is
    /// drained again on the next cycle.
    pub fn drain<F, E>(&self, visitor: F) -> Result<DrainReport, E>
    where
        F: FnMut(u64, u64, &[u8]) -> Result<(), E>,
    {
        let retired = self.active.fetch_xor(1, Ordering::AcqRel);
        let mut cache = self.caches[retired].write();

        let stats = cache.stats();
        cache.for_each(visitor)?;
        cache.clear();

        Ok(DrainReport {
            buffer: retired,
            entries: stats.entries,
            bytes: stats.used_bytes,
            generation: cache.generation(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> DoubleBuffer {
        let config: WriteCacheConfig =
            toml::from_str("capacity = \"64KB\"\nsegment_size = \"4KB\"").unwrap();
        DoubleBuffer::new(&config).unwrap()
    }

    #[test]
    fn test_drain_swaps_and_clears() {
        let buffer = buffer();
        buffer.with_active(|cache| {
            cache.put(2, 0, b"b").unwrap();
            cache.put(1, 0, b"a").unwrap();
        });

        let mut seen = Vec::new();
        let report = buffer
            .drain(|ledger, entry, data| {
                seen.push((ledger, entry, data.to_vec()));
                Ok::<_, WriteCacheError>(())
            })
            .unwrap();

        assert_eq!(report.buffer, 0);
        assert_eq!(report.entries, 2);
        assert_eq!(report.generation, 1);
        assert_eq!(seen, vec![(1, 0, b"a".to_vec()), (2, 0, b"b".to_vec())]);

        // Writes now land in the other buffer
        buffer.with_active(|cache| assert!(cache.is_empty()));
        buffer.with_active(|cache| cache.put(3, 0, b"c").unwrap());
        assert_eq!(buffer.active_stats().entries, 1);
    }

    #[test]
    fn test_failed_drain_keeps_entries() {
        let buffer = buffer();
        buffer.with_active(|cache| cache.put(1, 0, b"a").unwrap());

        let result = buffer.drain(|_, _, _| Err("sink down"));
        assert_eq!(result.unwrap_err(), "sink down");

        // Retired buffer still holds the entry and is picked up again
        buffer.drain(|_, _, _| Ok::<_, &str>(())).unwrap();
        let report = buffer.drain(|_, _, _| Ok::<_, &str>(())).unwrap();
        assert_eq!(report.buffer, 0);
        assert_eq!(report.entries, 1);
    }

    #[test]
    fn test_lookup_checks_retired_buffer() {
        let buffer = buffer();
        buffer.with_active(|cache| cache.put(1, 0, b"a").unwrap());
        buffer.active.fetch_xor(1, Ordering::AcqRel);

        let found = buffer.lookup(|cache| cache.get(1, 0).unwrap().map(|d| d.to_vec()));
        assert_eq!(found, Some(b"a".to_vec()));
    }

    #[test]
    fn test_drain_request_is_consumed() {
        let buffer = buffer();
        assert!(!buffer.wait_for_request(Duration::from_millis(1)));
        buffer.request_drain();
        assert!(buffer.wait_for_request(Duration::from_millis(1)));
        assert!(!buffer.wait_for_request(Duration::from_millis(1)));
    }
}
