//! Pluggable off-heap memory sources for the segment pool.
//!
//! The pool asks its [`MemoryAllocator`] for one region covering the whole
//! cache capacity and partitions it into segments. Two allocators are
//! provided:
//!
//! - [`MmapAllocator`]: anonymous `mmap` with optional hugepages and NUMA
//!   binding. This is the default.
//! - [`HeapAllocator`]: a zeroed region from the global allocator, useful for
//!   small caches and platforms without `mmap`.
//!
//! Custom allocators can hand over any boxed byte slice through
//! [`Allocation::from_boxed_slice`].

use std::alloc::Layout;
use std::ptr::NonNull;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Alignment of heap-backed regions (one cache line).
const HEAP_ALIGN: usize = 64;

/// A source of raw memory for the write cache.
pub trait MemoryAllocator: Send + Sync {
    /// Allocate a region of at least `size` bytes.
    ///
    /// Implementations must reject `size == 0` with
    /// [`std::io::ErrorKind::InvalidInput`].
    fn allocate(&self, size: usize) -> Result<Allocation, std::io::Error>;
}

/// Hugepage size preference for mmap allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HugepageSize {
    /// No explicit hugepages, use regular 4KB pages.
    /// The OS may still use THP if configured system-wide.
    #[default]
    None,
    /// 2MB hugepages (MAP_HUGETLB | MAP_HUGE_2MB).
    /// Falls back to regular pages (with THP hint) if unavailable.
    TwoMegabyte,
    /// 1GB hugepages (MAP_HUGETLB | MAP_HUGE_1GB).
    /// Falls back directly to regular pages (with THP hint) if unavailable.
    OneGigabyte,
}

/// The page size actually backing an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatedPageSize {
    /// 1GB hugepages were used.
    OneGigabyte,
    /// 2MB hugepages were used.
    TwoMegabyte,
    /// Regular 4KB pages (possibly with THP).
    Regular,
    /// Memory obtained from the global allocator.
    Heap,
}

impl std::fmt::Display for AllocatedPageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocatedPageSize::OneGigabyte => write!(f, "1GB hugepages"),
            AllocatedPageSize::TwoMegabyte => write!(f, "2MB hugepages"),
            AllocatedPageSize::Regular => write!(f, "4KB pages"),
            AllocatedPageSize::Heap => write!(f, "heap"),
        }
    }
}

/// How an allocation must be returned on drop.
#[derive(Debug)]
enum Backing {
    Mmap {
        mapped_size: usize,
        page_size: AllocatedPageSize,
    },
    Heap {
        layout: Layout,
    },
    Boxed,
}

/// An owned region of raw memory, released on drop.
#[derive(Debug)]
pub struct Allocation {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// Safety: the allocation is plain memory owned by this value. Concurrent
// access to the bytes is coordinated by the segments that partition it.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    /// Take ownership of a boxed byte slice.
    ///
    /// Lets custom [`MemoryAllocator`] implementations supply memory without
    /// touching raw pointers.
    pub fn from_boxed_slice(bytes: Box<[u8]>) -> Result<Self, std::io::Error> {
        if bytes.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot allocate zero bytes",
            ));
        }
        let len = bytes.len();
        let raw = Box::into_raw(bytes) as *mut u8;
        Ok(Self {
            // Box never yields a null pointer.
            ptr: unsafe { NonNull::new_unchecked(raw) },
            len,
            backing: Backing::Boxed,
        })
    }

    /// Pointer to the start of the region.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Usable length in bytes (the size that was requested).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty. Always `false` for a live allocation.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The page size backing this region.
    pub fn page_size(&self) -> AllocatedPageSize {
        match self.backing {
            Backing::Mmap { page_size, .. } => page_size,
            Backing::Heap { .. } | Backing::Boxed => AllocatedPageSize::Heap,
        }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        match self.backing {
            Backing::Mmap { mapped_size, .. } => unsafe {
                let result = libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, mapped_size);
                debug_assert_eq!(result, 0, "munmap failed");
            },
            Backing::Heap { layout } => unsafe {
                std::alloc::dealloc(self.ptr.as_ptr(), layout);
            },
            Backing::Boxed => unsafe {
                let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
                drop(Box::from_raw(slice));
            },
        }
    }
}

/// Allocates from the global allocator with cache-line alignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl MemoryAllocator for HeapAllocator {
    fn allocate(&self, size: usize) -> Result<Allocation, std::io::Error> {
        if size == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot allocate zero bytes",
            ));
        }

        let layout = Layout::from_size_align(size, HEAP_ALIGN)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                format!("failed to allocate {}", format_bytes(size)),
            )
        })?;

        tracing::debug!(size = %format_bytes(size), "allocated heap region");

        Ok(Allocation {
            ptr,
            len: size,
            backing: Backing::Heap { layout },
        })
    }
}

/// Allocates anonymous mappings, optionally hugepage-backed and NUMA-bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct MmapAllocator {
    hugepage_size: HugepageSize,
    numa_node: Option<u32>,
}

impl MmapAllocator {
    /// Regular pages, default NUMA policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hugepage size preference.
    ///
    /// Falls back to regular pages if hugepages are unavailable.
    pub fn hugepage_size(mut self, size: HugepageSize) -> Self {
        self.hugepage_size = size;
        self
    }

    /// Bind the mapping to a NUMA node using `mbind()` (Linux only).
    pub fn numa_node(mut self, node: u32) -> Self {
        self.numa_node = Some(node);
        self
    }
}

impl MemoryAllocator for MmapAllocator {
    fn allocate(&self, size: usize) -> Result<Allocation, std::io::Error> {
        if size == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot allocate zero bytes",
            ));
        }

        let (ptr, mapped_size, page_size) = match self.hugepage_size {
            HugepageSize::OneGigabyte => map_prefer_1gb(size),
            HugepageSize::TwoMegabyte => map_prefer_2mb(size),
            HugepageSize::None => map_regular(round_up(size, 4096)),
        }?;

        // Constructed before binding so a failed mbind still unmaps.
        let alloc = Allocation {
            ptr,
            len: size,
            backing: Backing::Mmap {
                mapped_size,
                page_size,
            },
        };

        if let Some(node) = self.numa_node {
            bind_to_numa_node(alloc.as_ptr(), mapped_size, node)?;
        }

        Ok(alloc)
    }
}

/// Round up to the nearest multiple of `align`.
#[inline]
fn round_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: usize) -> String {
    if bytes >= GB && bytes % GB == 0 {
        format!("{} GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}

type Mapping = (NonNull<u8>, usize, AllocatedPageSize);

/// Try 1GB pages when the rounding waste is under 50%, else regular pages.
fn map_prefer_1gb(size: usize) -> Result<Mapping, std::io::Error> {
    let rounded_1gb = round_up(size, GB);
    let waste_1gb = rounded_1gb - size;

    if size >= GB && waste_1gb * 2 <= rounded_1gb {
        match try_mmap_hugepage(rounded_1gb, GB) {
            Ok(ptr) => {
                tracing::info!(
                    size = %format_bytes(rounded_1gb),
                    pages = rounded_1gb / GB,
                    "allocated using 1GB hugepages"
                );
                return Ok((ptr, rounded_1gb, AllocatedPageSize::OneGigabyte));
            }
            Err(e) => {
                tracing::warn!(error = %e, "1GB hugepage allocation failed, falling back to regular pages");
            }
        }
    }

    map_regular(round_up(size, 2 * MB))
}

/// Try 2MB pages, falling back to regular pages of the same rounded size.
fn map_prefer_2mb(size: usize) -> Result<Mapping, std::io::Error> {
    let rounded_2mb = round_up(size, 2 * MB);

    match try_mmap_hugepage(rounded_2mb, 2 * MB) {
        Ok(ptr) => {
            tracing::info!(
                size = %format_bytes(rounded_2mb),
                pages = rounded_2mb / (2 * MB),
                "allocated using 2MB hugepages"
            );
            return Ok((ptr, rounded_2mb, AllocatedPageSize::TwoMegabyte));
        }
        Err(e) => {
            tracing::warn!(error = %e, "2MB hugepage allocation failed, falling back to regular pages");
        }
    }

    map_regular(rounded_2mb)
}

/// Map regular pages with a THP hint and prefault them.
fn map_regular(mapped_size: usize) -> Result<Mapping, std::io::Error> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            mapped_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }

    // Best-effort THP hint (MADV_HUGEPAGE = 14).
    #[cfg(target_os = "linux")]
    unsafe {
        let _ = libc::madvise(ptr, mapped_size, 14);
    }

    tracing::debug!(size = %format_bytes(mapped_size), "allocated using regular pages");

    prefault(ptr as *mut u8, mapped_size, 4096);

    Ok((
        unsafe { NonNull::new_unchecked(ptr as *mut u8) },
        mapped_size,
        AllocatedPageSize::Regular,
    ))
}

#[cfg(target_os = "linux")]
fn try_mmap_hugepage(size: usize, page_size: usize) -> Result<NonNull<u8>, std::io::Error> {
    const MAP_HUGETLB: libc::c_int = 0x40000;
    const MAP_HUGE_SHIFT: libc::c_int = 26;

    let huge_flag = if page_size == GB {
        MAP_HUGETLB | (30 << MAP_HUGE_SHIFT)
    } else if page_size == 2 * MB {
        MAP_HUGETLB | (21 << MAP_HUGE_SHIFT)
    } else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "unsupported hugepage size",
        ));
    };

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | huge_flag,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }

    prefault(ptr as *mut u8, size, page_size);

    Ok(unsafe { NonNull::new_unchecked(ptr as *mut u8) })
}

#[cfg(not(target_os = "linux"))]
fn try_mmap_hugepage(_size: usize, _page_size: usize) -> Result<NonNull<u8>, std::io::Error> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "hugepages not supported on this platform",
    ))
}

/// Bind a memory region to a NUMA node with `MPOL_BIND`.
#[cfg(target_os = "linux")]
fn bind_to_numa_node(ptr: *mut u8, size: usize, node: u32) -> Result<(), std::io::Error> {
    const MPOL_BIND: libc::c_int = 2;
    const MPOL_MF_MOVE: libc::c_uint = 1 << 1;

    if node >= libc::c_ulong::BITS - 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("NUMA node {} out of range", node),
        ));
    }

    let mut nodemask: libc::c_ulong = 1 << node;

    let result = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            ptr as *mut libc::c_void,
            size,
            MPOL_BIND,
            &mut nodemask as *mut libc::c_ulong,
            // maxnode must exceed the highest node bit
            (node + 2) as libc::c_ulong,
            MPOL_MF_MOVE,
        )
    };

    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_to_numa_node(_ptr: *mut u8, _size: usize, _node: u32) -> Result<(), std::io::Error> {
    Ok(())
}

/// Touch every page so the OS backs the mapping before the first put.
fn prefault(ptr: *mut u8, size: usize, page_size: usize) {
    unsafe {
        for offset in (0..size).step_by(page_size) {
            std::ptr::write_volatile(ptr.add(offset), 0);
        }
    }
}
