//! Growable memory regions backing a [`TagHeap`](crate::TagHeap).
//!
//! A provider behaves like `sbrk`: it hands out a contiguous region that only
//! ever grows at its high end. The heap never gives memory back.

use alloc::alloc as global;
use core::{alloc::Layout, ptr::NonNull};

use crate::tag::ALIGNMENT;

/// The error returned when a provider cannot grow.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("heap region exhausted: requested={requested}, available={available}")]
pub struct ExtendError {
    /// Bytes asked for.
    pub requested: usize,
    /// Bytes still available when the request was made.
    pub available: usize,
}

/// A contiguous memory region that can be grown on demand.
pub trait HeapProvider {
    /// Grows the region by `increment` bytes and returns the old end, which
    /// is the start of the new bytes.
    ///
    /// Either the whole increment is added or nothing is.
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>, ExtendError>;

    /// Returns the low bound of the region.
    fn start(&self) -> NonNull<u8>;

    /// Returns one past the last byte of the region.
    fn end(&self) -> NonNull<u8>;

    /// Returns the current size of the region in bytes.
    fn len(&self) -> usize {
        self.end().addr().get() - self.start().addr().get()
    }

    /// Returns `true` if the region has not been grown yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P> HeapProvider for &mut P
where
    P: HeapProvider + ?Sized,
{
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>, ExtendError> {
        (**self).extend(increment)
    }

    fn start(&self) -> NonNull<u8> {
        (**self).start()
    }

    fn end(&self) -> NonNull<u8> {
        (**self).end()
    }
}

/// Break-pointer bookkeeping shared by the providers.
#[derive(Debug)]
struct Break {
    start: NonNull<u8>,
    brk: usize,
    capacity: usize,
}

impl Break {
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>, ExtendError> {
        let available = self.capacity - self.brk;
        if increment > available {
            return Err(ExtendError {
                requested: increment,
                available,
            });
        }
        let old_brk = unsafe { self.start.add(self.brk) };
        self.brk += increment;
        Ok(old_brk)
    }

    fn end(&self) -> NonNull<u8> {
        unsafe { self.start.add(self.brk) }
    }
}

/// A provider over a caller-supplied memory range.
#[derive(Debug)]
pub struct RawRegion {
    inner: Break,
}

unsafe impl Send for RawRegion {}

impl RawRegion {
    /// Creates a provider over `region_start..region_start + region_size`.
    ///
    /// The start is rounded up and the capacity down to a multiple of
    /// [`ALIGNMENT`]. Returns `None` if the region is null.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - The memory range is valid for reads and writes
    /// - The memory range is not used by anything else while the provider or
    ///   a heap built on it is alive
    #[must_use]
    pub unsafe fn new(region_start: *mut u8, region_size: usize) -> Option<Self> {
        let start = NonNull::new(region_start)?;
        let align_offset = region_start.align_offset(ALIGNMENT);
        let capacity = region_size.saturating_sub(align_offset) / ALIGNMENT * ALIGNMENT;
        let start = unsafe { start.add(align_offset.min(region_size)) };
        Some(Self {
            inner: Break {
                start,
                brk: 0,
                capacity,
            },
        })
    }

    /// Returns the maximum size the region can grow to.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl HeapProvider for RawRegion {
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>, ExtendError> {
        self.inner.extend(increment)
    }

    fn start(&self) -> NonNull<u8> {
        self.inner.start
    }

    fn end(&self) -> NonNull<u8> {
        self.inner.end()
    }
}

/// A provider owning a fixed-capacity buffer from the global allocator.
///
/// The buffer is released when the provider is dropped, so every pointer
/// handed out by a heap built on it dies with the heap.
#[derive(Debug)]
pub struct OwnedRegion {
    inner: Break,
    layout: Layout,
}

unsafe impl Send for OwnedRegion {}

impl OwnedRegion {
    /// Allocates a region able to grow up to `capacity` bytes.
    ///
    /// The capacity is rounded up to a multiple of [`ALIGNMENT`]. Aborts
    /// through [`handle_alloc_error`](global::handle_alloc_error) if the
    /// global allocator fails.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or too large for a [`Layout`].
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "region capacity must not be zero");
        let Ok(layout) = Layout::from_size_align(capacity, ALIGNMENT) else {
            panic!("region capacity too large: {capacity}");
        };
        let layout = layout.pad_to_align();
        let start = unsafe { global::alloc(layout) };
        let Some(start) = NonNull::new(start) else {
            global::handle_alloc_error(layout);
        };
        Self {
            inner: Break {
                start,
                brk: 0,
                capacity: layout.size(),
            },
            layout,
        }
    }

    /// Returns the maximum size the region can grow to.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Drop for OwnedRegion {
    fn drop(&mut self) {
        unsafe { global::dealloc(self.inner.start.as_ptr(), self.layout) }
    }
}

impl HeapProvider for OwnedRegion {
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>, ExtendError> {
        self.inner.extend(increment)
    }

    fn start(&self) -> NonNull<u8> {
        self.inner.start
    }

    fn end(&self) -> NonNull<u8> {
        self.inner.end()
    }
}
