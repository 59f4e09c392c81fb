//! Concurrent ordered entry index.
//!
//! Maps [`EntryKey`] to [`Location`] in a lock-free skip list, ordered by
//! `(ledger_id, entry_id)`. Inserts retarget existing keys, so an overwrite
//! is a single atomic swap of the published location. A [`TailTracker`] rides
//! alongside to answer last-entry queries without a scan.

use crate::location::{EntryKey, Location};
use crate::tail::TailTracker;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;

pub(crate) struct EntryIndex {
    entries: SkipMap<EntryKey, Location>,
    tails: TailTracker,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
            tails: TailTracker::new(),
        }
    }

    /// Publish `location` for `key`, replacing any previous location.
    ///
    /// The payload must already be written: readers may see the location as
    /// soon as the skip list insert completes.
    pub fn insert(&self, key: EntryKey, location: Location) {
        self.entries.insert(key, location);
        self.tails.observe(key.ledger_id(), key.entry_id());
    }

    pub fn get(&self, key: &EntryKey) -> Option<Location> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Key and location of the highest entry in `ledger_id`.
    pub fn last_entry(&self, ledger_id: u64) -> Option<(EntryKey, Location)> {
        if let Some(entry_id) = self.tails.get(ledger_id) {
            let key = EntryKey::from_parts(ledger_id, entry_id);
            if let Some(location) = self.get(&key) {
                let above = self
                    .entries
                    .lower_bound(Bound::Excluded(&key))
                    .is_some_and(|entry| entry.key().ledger_id() == ledger_id);
                if !above {
                    return Some((key, location));
                }
            }
        }

        // The tail raced with a delete, or was never recorded.
        let end = EntryKey::ledger_end(ledger_id);
        let (key, location) = self
            .entries
            .upper_bound(Bound::Included(&end))
            .filter(|entry| entry.key().ledger_id() == ledger_id)
            .map(|entry| (*entry.key(), *entry.value()))?;

        self.tails.observe(ledger_id, key.entry_id());
        Some((key, location))
    }

    /// Remove every entry of `ledger_id` and its tail. Returns the number of
    /// entries removed.
    pub fn remove_ledger(&self, ledger_id: u64) -> usize {
        let range = EntryKey::ledger_start(ledger_id)..=EntryKey::ledger_end(ledger_id);
        let mut removed = 0;
        for entry in self.entries.range(range) {
            if entry.remove() {
                removed += 1;
            }
        }
        self.tails.remove(ledger_id);
        removed
    }

    /// Entries in key order.
    ///
    /// The walk is lazy and does not block writers. Every entry present for
    /// the whole walk is yielded exactly once.
    pub fn iter(&self) -> impl Iterator<Item = (EntryKey, Location)> + '_ {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of ledgers with a recorded tail.
    pub fn ledger_count(&self) -> usize {
        self.tails.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.tails.clear();
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    fn key(ledger: u64, entry: u64) -> EntryKey {
        EntryKey::from_parts(ledger, entry)
    }

    fn loc(offset: u32) -> Location {
        Location::new(0, offset, 1)
    }

    #[test]
    fn test_insert_and_retarget() {
        let index = EntryIndex::new();
        index.insert(key(1, 1), loc(0));
        assert_eq!(index.get(&key(1, 1)), Some(loc(0)));

        index.insert(key(1, 1), loc(5));
        assert_eq!(index.get(&key(1, 1)), Some(loc(5)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_last_entry_uses_highest_id() {
        let index = EntryIndex::new();
        index.insert(key(3, 8), loc(0));
        index.insert(key(3, 1), loc(1));
        index.insert(key(3, 2), loc(2));
        index.insert(key(4, 100), loc(3));

        assert_eq!(index.last_entry(3), Some((key(3, 8), loc(0))));
        assert_eq!(index.last_entry(4), Some((key(4, 100), loc(3))));
        assert_eq!(index.last_entry(5), None);
    }

    #[test]
    fn test_last_entry_falls_back_to_scan() {
        let index = EntryIndex::new();
        index.insert(key(3, 8), loc(0));
        index.insert(key(3, 2), loc(1));

        // Simulate a tail that outlived its entry
        index.entries.remove(&key(3, 8));
        assert_eq!(index.last_entry(3), Some((key(3, 2), loc(1))));

        // And a ledger with no tail at all
        index.tails.remove(3);
        assert_eq!(index.last_entry(3), Some((key(3, 2), loc(1))));
    }

    #[test]
    fn test_last_entry_ignores_tail_below_highest_entry() {
        let index = EntryIndex::new();

        // A ledger delete drops the tail after a racing put of entry 9 has
        // already landed behind its range walk; a later put of entry 3 then
        // records a tail lower than the highest indexed entry.
        index.insert(key(1, 9), loc(0));
        index.tails.remove(1);
        index.insert(key(1, 3), loc(1));
        index.insert(key(2, 0), loc(2));
        assert_eq!(index.tails.get(1), Some(3));

        assert_eq!(index.last_entry(1), Some((key(1, 9), loc(0))));
        assert_eq!(index.tails.get(1), Some(9));
        assert_eq!(index.last_entry(1), Some((key(1, 9), loc(0))));
    }

    #[test]
    fn test_last_entry_does_not_cross_ledgers() {
        let index = EntryIndex::new();
        index.insert(key(2, 7), loc(0));
        index.tails.remove(2);
        assert_eq!(index.last_entry(3), None);
        assert_eq!(index.last_entry(1), None);
    }

    #[test]
    fn test_remove_ledger() {
        let index = EntryIndex::new();
        for e in 0..10 {
            index.insert(key(1, e), loc(e as u32));
            index.insert(key(2, e), loc(e as u32));
        }
        index.insert(key(0, u64::MAX >> 1), loc(0));

        assert_eq!(index.remove_ledger(1), 10);
        assert_eq!(index.remove_ledger(1), 0);
        assert!(!index.contains(&key(1, 3)));
        assert_eq!(index.last_entry(1), None);
        assert_eq!(index.len(), 11);
        assert_eq!(index.last_entry(2), Some((key(2, 9), loc(9))));
        assert!(index.contains(&key(0, u64::MAX >> 1)));
    }

    #[test]
    fn test_iter_is_ordered() {
        let index = EntryIndex::new();
        for (l, e) in [(2, 2), (1, 5), (1, 1), (10, 0), (2, 0)] {
            index.insert(key(l, e), loc(0));
        }
        let keys: Vec<_> = index
            .iter()
            .map(|(k, _)| (k.ledger_id(), k.entry_id()))
            .collect();
        assert_eq!(keys, vec![(1, 1), (1, 5), (2, 0), (2, 2), (10, 0)]);
    }

    #[test]
    fn test_clear() {
        let mut index = EntryIndex::new();
        index.insert(key(1, 1), loc(0));
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.ledger_count(), 0);
        assert_eq!(index.last_entry(1), None);
    }
}
