//! Segment pool and append allocator.
//!
//! [`SegmentPool`] owns one [`Allocation`] covering the whole cache capacity
//! and partitions it into [`Segment`]s at construction time. Appends go to the
//! *active* segment. When it cannot fit an entry the pool advances the active
//! pointer to the next segment and tries exactly once more there; it never
//! searches further. Space is reclaimed only by [`SegmentPool::clear`].

use crate::allocator::{Allocation, MemoryAllocator};
use crate::error::WriteCacheError;
use crate::location::Location;
use crate::metrics::SEGMENT_ADVANCES;
use crate::segment::Segment;
use crate::sync::*;

/// How the total capacity is divided into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentLayout {
    /// One segment spanning the whole capacity.
    #[default]
    Single,
    /// Segments of at most this many bytes. All segments are full-sized
    /// except the last, which holds the remainder.
    MaxSegmentSize(usize),
    /// This many equal segments of `capacity / count` bytes each.
    SegmentCount(usize),
}

impl SegmentLayout {
    /// Compute the per-segment sizes for `capacity` bytes.
    pub(crate) fn segment_sizes(&self, capacity: usize) -> Result<Vec<u32>, WriteCacheError> {
        if capacity == 0 {
            return Err(WriteCacheError::InvalidConfig(
                "capacity must be greater than zero".into(),
            ));
        }

        let sizes = match *self {
            SegmentLayout::Single => vec![capacity],
            SegmentLayout::MaxSegmentSize(max) => {
                if max == 0 {
                    return Err(WriteCacheError::InvalidConfig(
                        "segment_size must be greater than zero".into(),
                    ));
                }
                let full = capacity / max;
                let remainder = capacity % max;
                let mut sizes = vec![max; full];
                if remainder > 0 {
                    sizes.push(remainder);
                }
                sizes
            }
            SegmentLayout::SegmentCount(count) => {
                if count == 0 {
                    return Err(WriteCacheError::InvalidConfig(
                        "segment_count must be greater than zero".into(),
                    ));
                }
                let size = capacity / count;
                if size == 0 {
                    return Err(WriteCacheError::InvalidConfig(format!(
                        "capacity ({}) is smaller than segment_count ({})",
                        capacity, count
                    )));
                }
                vec![size; count]
            }
        };

        if sizes.len() > u32::MAX as usize {
            return Err(WriteCacheError::InvalidConfig(format!(
                "too many segments ({})",
                sizes.len()
            )));
        }

        sizes
            .into_iter()
            .map(|size| {
                u32::try_from(size).map_err(|_| {
                    WriteCacheError::InvalidConfig(format!(
                        "segment size ({}) exceeds {} bytes",
                        size,
                        u32::MAX
                    ))
                })
            })
            .collect()
    }
}

/// A fixed set of segments carved out of a single allocation.
///
/// # Thread Safety
///
/// `reserve`, `write` and `read` take `&self` and only touch atomics.
/// `clear` takes `&mut self`: no reader can hold a view into the generation
/// being discarded.
pub struct SegmentPool {
    /// Segment metadata. Points into `heap`.
    segments: Vec<Segment>,

    /// Index of the segment currently receiving appends.
    active: AtomicU32,

    /// Incremented on every clear.
    generation: AtomicU64,

    /// Usable bytes across all segments.
    capacity: usize,

    /// Backing memory (released on drop, after `segments`).
    heap: Allocation,
}

impl SegmentPool {
    /// Allocate `capacity` bytes from `allocator` and partition them.
    pub fn new<A>(
        allocator: &A,
        capacity: usize,
        layout: SegmentLayout,
    ) -> Result<Self, WriteCacheError>
    where
        A: MemoryAllocator + ?Sized,
    {
        let sizes = layout.segment_sizes(capacity)?;
        let usable: usize = sizes.iter().map(|&s| s as usize).sum();

        let heap = allocator.allocate(usable)?;
        if heap.len() < usable {
            return Err(WriteCacheError::InvalidConfig(format!(
                "allocator returned {} bytes, {} requested",
                heap.len(),
                usable
            )));
        }

        let mut segments = Vec::with_capacity(sizes.len());
        let mut offset = 0usize;
        for (id, size) in sizes.into_iter().enumerate() {
            // SAFETY: offset + size <= usable <= heap.len(), segments are disjoint
            let segment = unsafe { Segment::new(id as u32, heap.as_ptr().add(offset), size) };
            segments.push(segment);
            offset += size as usize;
        }

        tracing::info!(
            capacity = usable,
            segments = segments.len(),
            page_size = %heap.page_size(),
            "segment pool allocated"
        );

        Ok(Self {
            segments,
            active: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            capacity: usable,
            heap,
        })
    }

    /// Reserve `len` contiguous bytes in the active segment.
    ///
    /// If the active segment is full and the entry fits in an empty next
    /// segment, the active pointer advances and the reservation is retried
    /// there. A writer that loses the advance to another writer follows the
    /// new active segment. Returns `None` only when the last segment is full
    /// or the entry is larger than the next segment.
    pub(crate) fn reserve(&self, len: u32) -> Option<Location> {
        let mut active = self.active.load(Ordering::Acquire);

        loop {
            let segment = &self.segments[active as usize];
            if let Some(offset) = segment.reserve(len) {
                return Some(Location::new(active, offset, len));
            }

            let next = active + 1;
            let next_segment = self.segments.get(next as usize)?;
            if len > next_segment.capacity() {
                return None;
            }

            active = match self.active.compare_exchange(
                active,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    SEGMENT_ADVANCES.increment();
                    tracing::trace!(from = active, to = next, "advanced active segment");
                    next
                }
                // Another writer already advanced
                Err(current) => current,
            };
        }
    }

    /// Copy `bytes` into a reserved location.
    ///
    /// # Safety
    ///
    /// `location` must come from [`SegmentPool::reserve`] in the current
    /// generation, with `location.len() == bytes.len()`, and be written once.
    pub(crate) unsafe fn write(&self, location: Location, bytes: &[u8]) {
        debug_assert_eq!(location.len() as usize, bytes.len());
        let segment = &self.segments[location.segment() as usize];
        unsafe { segment.write(location.offset(), bytes) }
    }

    /// Borrow the payload at `location`.
    ///
    /// Returns `None` if the location does not lie inside a segment.
    pub(crate) fn read(&self, location: Location) -> Option<&[u8]> {
        let segment = self.segments.get(location.segment() as usize)?;
        // SAFETY: locations reach readers only through the index, which
        // publishes them after the payload copy completes.
        unsafe { segment.read(location.offset(), location.len()) }
    }

    /// Rewind every segment and start a new generation.
    pub fn clear(&mut self) {
        for segment in &self.segments {
            segment.reset();
        }
        self.active.store(0, Ordering::Release);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation, "segment pool cleared");
    }

    /// Usable bytes across all segments.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Capacity of the first (largest) segment.
    pub fn segment_size(&self) -> usize {
        self.segments.first().map_or(0, |s| s.capacity() as usize)
    }

    /// Get a segment by index.
    pub fn get(&self, id: u32) -> Option<&Segment> {
        self.segments.get(id as usize)
    }

    /// Index of the segment receiving appends.
    pub fn active_segment(&self) -> u32 {
        self.active.load(Ordering::Acquire)
    }

    /// Number of clears since construction.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Bytes handed out in this generation, dead copies included.
    pub fn used_bytes(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.write_offset() as usize)
            .sum()
    }

    /// The backing allocation.
    pub fn allocation(&self) -> &Allocation {
        &self.heap
    }
}

impl std::fmt::Debug for SegmentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentPool")
            .field("capacity", &self.capacity)
            .field("segments", &self.segments.len())
            .field("active", &self.active_segment())
            .field("generation", &self.generation())
            .finish()
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use crate::allocator::HeapAllocator;
    use loom::sync::Arc;
    use loom::thread;

    /// Writers that lose the advance to another writer still find the empty
    /// segments behind it.
    #[test]
    fn test_concurrent_reserve_across_segments() {
        loom::model(|| {
            let pool = Arc::new(
                SegmentPool::new(&HeapAllocator, 24, SegmentLayout::MaxSegmentSize(8)).unwrap(),
            );

            let handles: Vec<_> = (0..3)
                .map(|_| {
                    let pool = pool.clone();
                    thread::spawn(move || pool.reserve(8))
                })
                .collect();

            let mut segments: Vec<u32> = handles
                .into_iter()
                .map(|h| h.join().unwrap().expect("segment left empty").segment())
                .collect();
            segments.sort_unstable();
            assert_eq!(segments, [0, 1, 2]);
            assert_eq!(pool.used_bytes(), 24);
        });
    }
}
