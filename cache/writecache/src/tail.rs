//! Per-ledger tail tracker.
//!
//! Records the highest entry id written to each ledger so the last entry can
//! be found without walking the index. The tracker is a hint: the index stays
//! authoritative, and a tail that no longer resolves falls back to an index
//! lookup (see [`EntryIndex::last_entry`](crate::index::EntryIndex::last_entry)).

use dashmap::DashMap;

pub(crate) struct TailTracker {
    tails: DashMap<u64, u64>,
}

impl TailTracker {
    pub fn new() -> Self {
        Self {
            tails: DashMap::new(),
        }
    }

    /// Raise the ledger's tail to `entry_id` if it is higher.
    pub fn observe(&self, ledger_id: u64, entry_id: u64) {
        self.tails
            .entry(ledger_id)
            .and_modify(|tail| {
                if *tail < entry_id {
                    *tail = entry_id;
                }
            })
            .or_insert(entry_id);
    }

    pub fn get(&self, ledger_id: u64) -> Option<u64> {
        self.tails.get(&ledger_id).map(|tail| *tail)
    }

    pub fn remove(&self, ledger_id: u64) -> Option<u64> {
        self.tails.remove(&ledger_id).map(|(_, tail)| tail)
    }

    pub fn len(&self) -> usize {
        self.tails.len()
    }

    pub fn clear(&self) {
        self.tails.clear();
    }
}
