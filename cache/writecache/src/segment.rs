//! Fixed-capacity append-only segment.
//!
//! A [`Segment`] is a window into the pool's backing allocation plus an atomic
//! write cursor. Writers reserve space by advancing the cursor with a CAS loop
//! and then copy their payload into the reserved region, so no lock is held
//! across a memory copy.
//!
//! # Memory Layout
//!
//! ```text
//! +---------------------------------------------------+
//! | Entry 1 | Entry 2 | Entry 3 | ... | [unused space]|
//! +---------------------------------------------------+
//! ^                                 ^                  ^
//! 0                            write_offset        capacity
//! ```
//!
//! Bytes below `write_offset` are never rewritten within a generation. The
//! cursor only moves forward until the pool is cleared.

use crate::sync::*;
use std::ptr::NonNull;

/// A fixed-capacity region with an atomic append cursor.
#[repr(C, align(64))]
pub struct Segment {
    /// Next write position in the segment.
    write_offset: AtomicU32,

    /// Segment index within its pool.
    id: u32,

    /// Total data capacity (in bytes).
    capacity: u32,

    /// Pointer to segment data.
    data: NonNull<u8>,
}

// SAFETY: the cursor is atomic and every byte range is handed to exactly one
// writer by `reserve`; readers only see ranges published through the index.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Create a segment over `len` bytes starting at `data`.
    ///
    /// # Safety
    ///
    /// - `data` must point to at least `len` bytes of valid, writable memory
    /// - the memory must outlive the segment and must not overlap another segment
    pub(crate) unsafe fn new(id: u32, data: *mut u8, len: u32) -> Self {
        Self {
            write_offset: AtomicU32::new(0),
            id,
            capacity: len,
            data: unsafe { NonNull::new_unchecked(data) },
        }
    }

    /// Segment index within its pool.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Current cursor position (bytes handed out so far).
    #[inline]
    pub fn write_offset(&self) -> u32 {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Bytes still available for reservation.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.capacity - self.write_offset()
    }

    /// Reserve `len` bytes and return their start offset.
    ///
    /// Succeeds iff `cursor + len <= capacity`. Returns `None` when the entry
    /// does not fit in the remaining space; contention alone never fails.
    pub(crate) fn reserve(&self, len: u32) -> Option<u32> {
        let mut current = self.write_offset.load(Ordering::Acquire);

        loop {
            let new_offset = current.checked_add(len)?;

            if new_offset > self.capacity {
                return None;
            }

            match self.write_offset.compare_exchange_weak(
                current,
                new_offset,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(current),
                Err(actual) => {
                    current = actual;
                    spin_loop();
                }
            }
        }
    }

    /// Copy `bytes` into a reserved region.
    ///
    /// # Safety
    ///
    /// `offset..offset + bytes.len()` must have been returned by
    /// [`Segment::reserve`] in the current generation and not written since.
    pub(crate) unsafe fn write(&self, offset: u32, bytes: &[u8]) {
        debug_assert!(offset as usize + bytes.len() <= self.capacity as usize);
        if bytes.is_empty() {
            return;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.data.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
    }

    /// Borrow `len` bytes at `offset`.
    ///
    /// Returns `None` if the range lies outside the segment.
    ///
    /// # Safety
    ///
    /// The range must have been fully written and published (through the
    /// index) before this call.
    pub(crate) unsafe fn read(&self, offset: u32, len: u32) -> Option<&[u8]> {
        let end = offset as usize + len as usize;
        if end > self.capacity as usize {
            return None;
        }
        let ptr = unsafe { self.data.as_ptr().add(offset as usize) };
        Some(unsafe { std::slice::from_raw_parts(ptr, len as usize) })
    }

    /// Rewind the cursor to zero.
    pub(crate) fn reset(&self) {
        self.write_offset.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("write_offset", &self.write_offset())
            .finish()
    }
}
