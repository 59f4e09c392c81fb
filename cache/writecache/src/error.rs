//! Error types for write cache operations.
//!
//! Only malformed input and construction failures are errors. A full cache
//! and a missing entry are ordinary outcomes and are reported through return
//! values (`Ok(false)` and `Ok(None)`).

/// Errors that can occur during write cache operations.
#[derive(Debug, thiserror::Error)]
pub enum WriteCacheError {
    /// A ledger id or entry id was negative on a validating operation.
    #[error("invalid key: ledger_id={ledger_id} entry_id={entry_id}")]
    InvalidKey {
        /// The ledger id as passed by the caller.
        ledger_id: i64,
        /// The entry id as passed by the caller (0 for ledger-only operations).
        entry_id: i64,
    },

    /// The cache geometry is unusable (zero capacity, oversized segments, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The memory allocator could not provide the backing region.
    #[error("allocation failed: {0}")]
    Allocation(#[from] std::io::Error),
}

impl WriteCacheError {
    /// Returns `true` for [`WriteCacheError::InvalidKey`].
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, Self::InvalidKey { .. })
    }
}

/// Result type for write cache operations.
pub type Result<T> = std::result::Result<T, WriteCacheError>;
