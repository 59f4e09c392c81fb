//! Entry keys and storage locations.
//!
//! An [`EntryKey`] orders entries by ledger then entry id, which is the
//! iteration order of the index. A [`Location`] points at the payload bytes
//! of one entry inside one segment. Together they carry the record header
//! (ledger id, entry id, length), so segments hold payload bytes only.

use crate::error::WriteCacheError;
use std::fmt;

/// Composite key identifying one entry in the cache.
///
/// Field order gives the derived `Ord` its `(ledger_id, entry_id)` ordering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    ledger_id: u64,
    entry_id: u64,
}

impl EntryKey {
    /// Validate signed ids from the caller.
    ///
    /// Returns [`WriteCacheError::InvalidKey`] if either id is negative.
    #[inline]
    pub fn new(ledger_id: i64, entry_id: i64) -> Result<Self, WriteCacheError> {
        if ledger_id < 0 || entry_id < 0 {
            return Err(WriteCacheError::InvalidKey {
                ledger_id,
                entry_id,
            });
        }
        Ok(Self {
            ledger_id: ledger_id as u64,
            entry_id: entry_id as u64,
        })
    }

    /// Like [`EntryKey::new`] but maps negative ids to `None`.
    #[inline]
    pub fn checked(ledger_id: i64, entry_id: i64) -> Option<Self> {
        Self::new(ledger_id, entry_id).ok()
    }

    /// Smallest key of a ledger.
    #[inline]
    pub(crate) fn ledger_start(ledger_id: u64) -> Self {
        Self {
            ledger_id,
            entry_id: 0,
        }
    }

    /// Largest key a validated entry of this ledger can have.
    #[inline]
    pub(crate) fn ledger_end(ledger_id: u64) -> Self {
        Self {
            ledger_id,
            entry_id: i64::MAX as u64,
        }
    }

    #[inline]
    pub(crate) fn from_parts(ledger_id: u64, entry_id: u64) -> Self {
        Self {
            ledger_id,
            entry_id,
        }
    }

    /// The ledger id.
    #[inline]
    pub fn ledger_id(&self) -> u64 {
        self.ledger_id
    }

    /// The entry id within the ledger.
    #[inline]
    pub fn entry_id(&self) -> u64 {
        self.entry_id
    }
}

impl fmt::Debug for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryKey({}:{})", self.ledger_id, self.entry_id)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ledger_id, self.entry_id)
    }
}

/// Where an entry's payload lives: segment, byte offset and length.
///
/// Valid until the owning generation is cleared.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    segment: u32,
    offset: u32,
    len: u32,
}

impl Location {
    #[inline]
    pub(crate) fn new(segment: u32, offset: u32, len: u32) -> Self {
        Self {
            segment,
            offset,
            len,
        }
    }

    /// Index of the segment within the pool.
    #[inline]
    pub fn segment(&self) -> u32 {
        self.segment
    }

    /// Byte offset of the payload within the segment.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte of the payload.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset as usize + self.len as usize
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Location(seg={}, off={}, len={})",
            self.segment, self.offset, self.len
        )
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}:{}", self.segment, self.offset, self.len)
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_key_rejects_negative_ids() {
        for (ledger, entry) in [(-1, 0), (0, -1), (-1, -1), (i64::MIN, 5)] {
            let err = EntryKey::new(ledger, entry).unwrap_err();
            assert!(matches!(
                err,
                WriteCacheError::InvalidKey { ledger_id, entry_id }
                    if ledger_id == ledger && entry_id == entry
            ));
            assert!(EntryKey::checked(ledger, entry).is_none());
        }
    }

    #[test]
    fn test_key_accepts_boundaries() {
        let key = EntryKey::new(0, 0).unwrap();
        assert_eq!((key.ledger_id(), key.entry_id()), (0, 0));

        let key = EntryKey::new(i64::MAX, i64::MAX).unwrap();
        assert_eq!(key, EntryKey::ledger_end(i64::MAX as u64));
    }

    #[test]
    fn test_key_ordering() {
        let a = EntryKey::new(1, 9).unwrap();
        let b = EntryKey::new(2, 0).unwrap();
        let c = EntryKey::new(2, 1).unwrap();
        assert!(a < b);
        assert!(b < c);
        assert!(EntryKey::ledger_start(2) <= b);
        assert!(c <= EntryKey::ledger_end(2));
        assert!(EntryKey::ledger_end(1) < EntryKey::ledger_start(2));
    }

    #[test]
    fn test_key_display() {
        let key = EntryKey::new(3, 8).unwrap();
        assert_eq!(format!("{}", key), "3:8");
        assert_eq!(format!("{:?}", key), "EntryKey(3:8)");
    }

    #[test]
    fn test_location_accessors() {
        let loc = Location::new(2, 100, 5);
        assert_eq!(loc.segment(), 2);
        assert_eq!(loc.offset(), 100);
        assert_eq!(loc.len(), 5);
        assert_eq!(loc.end(), 105);
        assert!(!loc.is_empty());
        assert!(Location::new(0, 0, 0).is_empty());
    }

    #[test]
    fn test_location_display() {
        let loc = Location::new(1, 16, 4);
        assert_eq!(format!("{}", loc), "1+16:4");
        assert!(format!("{:?}", loc).contains("seg=1"));
    }
}
