//! Synchronization primitives with optional loom support.
//!
//! The segment cursors and the pool's active pointer are the only atomics on
//! the append path. They are imported from here so the `loom` feature can
//! swap in model-checked versions.

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Spin loop hint for CAS retries.
///
/// Under loom this yields so the model checker can schedule the thread that
/// won the race.
#[inline]
pub fn spin_loop() {
    #[cfg(not(feature = "loom"))]
    std::hint::spin_loop();

    #[cfg(feature = "loom")]
    loom::thread::yield_now();
}
