//! The allocator core.
//!
//! # Heap Layout
//!
//! ```text
//! start                                                              end
//! ┌─────┬───────────┬───────────┬─────────┬─────────┬───┬───────────┐
//! │ pad │ prologue  │ prologue  │ block 0 │ block 1 │...│ epilogue  │
//! │     │ hdr (2W|1)│ ftr (2W|1)│         │         │   │ hdr (0|1) │
//! └─────┴───────────┴───────────┴─────────┴─────────┴───┴───────────┘
//! ```
//!
//! The prologue and epilogue are permanently allocated sentinels, so
//! neighbor lookups never need to special-case the heap edges. Growing the
//! heap turns the old epilogue header into the header of a new free block
//! and writes a fresh epilogue at the new end.

use core::{
    marker::PhantomData,
    ptr::{self, NonNull},
};

use log::{debug, trace};
use snafu::{OptionExt as _, ResultExt as _};

use crate::{
    coalesce::coalesce,
    config::HeapConfig,
    error::{GrowSnafu, HeapError, InitSnafu, SizeOverflowSnafu},
    free_list::{self, FreeList},
    place::place,
    provider::{ExtendError, HeapProvider},
    tag::{ALIGNMENT, Block, MIN_BLOCK_SIZE, OVERHEAD, Tag, WORD_SIZE, adjusted_size},
};

/// Size of the prologue block.
pub(crate) const PROLOGUE_SIZE: usize = 2 * WORD_SIZE;

/// Bytes taken from the provider before the first chunk: padding, the
/// prologue and the epilogue header.
const SENTINEL_SIZE: usize = 4 * WORD_SIZE;

/// A general-purpose allocator over a single growable region.
///
/// Blocks carry boundary tags at both ends and free blocks are indexed by an
/// explicit LIFO free list, so freeing and coalescing are O(1) while
/// allocation is a first-fit scan of the free list.
///
/// The heap is not thread-safe and not reentrant. Every pointer it hands out
/// is valid until freed, resized away, or until the heap and its provider
/// are dropped.
///
/// # Examples
///
/// ```
/// use tagheap::{OwnedRegion, TagHeap};
///
/// let mut heap = TagHeap::new(OwnedRegion::with_capacity(1 << 16)).unwrap();
/// let ptr = heap.allocate(24).unwrap().unwrap();
/// unsafe {
///     ptr.as_ptr().write_bytes(0xab, 24);
///     let ptr = heap.resize(Some(ptr), 100).unwrap().unwrap();
///     assert_eq!(ptr.as_ptr().read(), 0xab);
///     heap.free(ptr);
/// }
/// assert!(heap.check().is_empty());
/// ```
pub struct TagHeap<P> {
    pub(crate) provider: P,
    pub(crate) free_list: FreeList,
    pub(crate) prologue: Block,
    config: HeapConfig,
}

unsafe impl<P> Send for TagHeap<P> where P: Send {}

impl<P> TagHeap<P>
where
    P: HeapProvider,
{
    /// Sets up a heap on an empty provider with the default configuration.
    pub fn new(provider: P) -> Result<Self, HeapError> {
        Self::with_config(provider, HeapConfig::default())
    }

    /// Sets up a heap on an empty provider.
    ///
    /// Writes the prologue and epilogue sentinels and performs the first
    /// extension of [`chunk_size`](HeapConfig::chunk_size) bytes.
    pub fn with_config(mut provider: P, config: HeapConfig) -> Result<Self, HeapError> {
        let base = provider.extend(SENTINEL_SIZE).context(InitSnafu)?;
        debug_assert!(base.addr().get().is_multiple_of(ALIGNMENT));

        let prologue = unsafe {
            base.cast::<usize>().write(0);
            let prologue = Block::from_payload(base.add(2 * WORD_SIZE));
            prologue.set_tags(PROLOGUE_SIZE, true);
            write_epilogue(prologue.next());
            prologue
        };

        let mut heap = Self {
            provider,
            free_list: FreeList::new(),
            prologue,
            config,
        };
        heap.extend_heap(config.chunk_size()).context(InitSnafu)?;
        debug!(
            "heap initialized: start={:#x}, end={:#x}",
            heap.provider.start().addr(),
            heap.provider.end().addr(),
        );
        Ok(heap)
    }

    /// Returns the configuration this heap was built with.
    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Returns the underlying provider.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Allocates a block with at least `size` usable bytes.
    ///
    /// Returns `Ok(None)` without allocating when `size` is zero. The
    /// returned pointer is aligned to [`ALIGNMENT`].
    pub fn allocate(&mut self, size: usize) -> Result<Option<NonNull<u8>>, HeapError> {
        if size == 0 {
            return Ok(None);
        }
        let asize = adjusted_size(size).context(SizeOverflowSnafu { requested: size })?;
        let block = self.allocate_block(asize)?;
        Ok(Some(block.payload()))
    }

    /// Allocates zero-filled room for `count` elements of `size` bytes.
    pub fn allocate_zeroed(
        &mut self,
        count: usize,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        let total = count.checked_mul(size).context(SizeOverflowSnafu {
            requested: count.saturating_mul(size),
        })?;
        let ptr = self.allocate(total)?;
        if let Some(ptr) = ptr {
            unsafe {
                ptr.write_bytes(0, total);
            }
        }
        Ok(ptr)
    }

    /// Frees a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and must not have been
    /// freed or resized away since. Violations corrupt the heap silently.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let block = Block::from_payload(ptr);
            block.set_tags(block.size(), false);
            coalesce(&mut self.free_list, block);
        }
    }

    /// Changes the size of a block, preserving its contents up to the
    /// smaller of the old and new sizes.
    ///
    /// - `ptr == None` behaves like [`allocate`](Self::allocate).
    /// - `new_size == 0` frees the block and returns `ptr` unchanged; the
    ///   returned pointer is no longer live.
    ///
    /// Otherwise the block is resized in place if possible, by absorbing a
    /// free predecessor, a free successor, or both, and relocated only as a
    /// last resort. On error the original block is left untouched.
    ///
    /// # Safety
    ///
    /// A non-`None` `ptr` must have been returned by this heap and must not
    /// have been freed or resized away since.
    pub unsafe fn resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size);
        };
        if new_size == 0 {
            unsafe {
                self.free(ptr);
            }
            return Ok(Some(ptr));
        }

        let asize = adjusted_size(new_size).context(SizeOverflowSnafu {
            requested: new_size,
        })?;
        unsafe {
            let block = Block::from_payload(ptr);
            let copy = new_size.min(block.size() - OVERHEAD);
            let plan = ResizePlan::choose(block, asize);
            trace!("resize {block:?} to {asize} bytes: {plan:?}");

            let resized = match plan {
                ResizePlan::InPlace => self.shrink(block, asize),
                ResizePlan::GrowLeft { prev } => self.grow_left(block, prev, asize, copy),
                ResizePlan::GrowRight { next } => self.grow_right(block, next, asize),
                ResizePlan::GrowBoth { prev, next } => {
                    self.grow_both(block, prev, next, asize, copy)
                }
                ResizePlan::Relocate => self.relocate(block, asize, copy)?,
            };
            Ok(Some(resized.payload()))
        }
    }

    /// Returns the number of usable bytes in an allocated block.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live pointer returned by this heap.
    #[must_use]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { Block::from_payload(ptr).size() - OVERHEAD }
    }

    /// Iterates over every block between the prologue and the epilogue in
    /// address order.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            next: Some(unsafe { self.prologue.next() }),
            _heap: PhantomData,
        }
    }

    /// Iterates over the free list in list order.
    #[must_use]
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            inner: unsafe { self.free_list.iter() },
            _heap: PhantomData,
        }
    }

    /// Summarizes the current heap usage.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.provider.len(),
            ..HeapStats::default()
        };
        for info in self.blocks() {
            if info.allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += info.size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += info.size;
            }
        }
        stats
    }

    fn allocate_block(&mut self, asize: usize) -> Result<Block, HeapError> {
        if let Some(block) = unsafe { self.free_list.find_first_fit(asize) } {
            return Ok(unsafe { place(&mut self.free_list, block, asize) });
        }

        let increment = asize.max(self.config.chunk_size());
        let block = self
            .extend_heap(increment)
            .inspect_err(|e| debug!("allocation of {asize} bytes failed: {e}"))
            .context(GrowSnafu { increment })?;
        Ok(unsafe { place(&mut self.free_list, block, asize) })
    }

    /// Grows the heap by `size` bytes and returns the resulting free block,
    /// already merged with a trailing free block and listed.
    fn extend_heap(&mut self, size: usize) -> Result<Block, ExtendError> {
        debug_assert!(size.is_multiple_of(ALIGNMENT) && size >= MIN_BLOCK_SIZE);
        let payload = self.provider.extend(size)?;
        debug!(
            "heap extended by {size} bytes: end={:#x}",
            self.provider.end().addr()
        );
        unsafe {
            // the old epilogue header becomes the new block's header
            let block = Block::from_payload(payload);
            block.set_tags(size, false);
            write_epilogue(block.next());
            Ok(coalesce(&mut self.free_list, block))
        }
    }

    /// Keeps the block where it is, returning trailing slack to the heap if
    /// it can form a block of its own.
    unsafe fn shrink(&mut self, block: Block, asize: usize) -> Block {
        unsafe {
            let bsize = block.size();
            let slack = bsize - asize;
            if slack >= MIN_BLOCK_SIZE {
                block.set_tags(asize, true);
                let remainder = block.next();
                remainder.set_tags(slack, false);
                coalesce(&mut self.free_list, remainder);
            }
            block
        }
    }

    /// Moves the block down into its free predecessor.
    ///
    /// The block is placed at the top of the combined region, so any slack
    /// stays behind as a smaller free predecessor.
    unsafe fn grow_left(
        &mut self,
        block: Block,
        prev: Block,
        asize: usize,
        copy: usize,
    ) -> Block {
        unsafe {
            let total = prev.size() + block.size();
            self.free_list.remove(prev);

            let slack = total - asize;
            let target = if slack >= MIN_BLOCK_SIZE {
                prev.offset(slack)
            } else {
                prev
            };
            // move the payload before any tag inside the region is rewritten
            ptr::copy(block.payload().as_ptr(), target.payload().as_ptr(), copy);

            if target == prev {
                target.set_tags(total, true);
            } else {
                prev.set_tags(slack, false);
                target.set_tags(asize, true);
                self.free_list.insert(prev);
            }
            target
        }
    }

    /// Extends the block into its free successor without moving it.
    unsafe fn grow_right(&mut self, block: Block, next: Block, asize: usize) -> Block {
        unsafe {
            let total = block.size() + next.size();
            self.free_list.remove(next);
            self.split_allocated(block, total, asize);
            block
        }
    }

    /// Moves the block down to its free predecessor and extends it into its
    /// free successor. Slack is left as a free block on the right.
    unsafe fn grow_both(
        &mut self,
        block: Block,
        prev: Block,
        next: Block,
        asize: usize,
        copy: usize,
    ) -> Block {
        unsafe {
            let total = prev.size() + block.size() + next.size();
            self.free_list.remove(prev);
            self.free_list.remove(next);

            ptr::copy(block.payload().as_ptr(), prev.payload().as_ptr(), copy);
            self.split_allocated(prev, total, asize);
            prev
        }
    }

    unsafe fn relocate(
        &mut self,
        block: Block,
        asize: usize,
        copy: usize,
    ) -> Result<Block, HeapError> {
        let target = self.allocate_block(asize)?;
        unsafe {
            trace!("relocating {block:?} to {target:?}, copying {copy} bytes");
            ptr::copy_nonoverlapping(block.payload().as_ptr(), target.payload().as_ptr(), copy);
            self.free(block.payload());
        }
        Ok(target)
    }

    /// Allocates the first `asize` bytes of the unlisted `total`-byte region
    /// at `block` and lists the rest if it is large enough.
    ///
    /// The caller guarantees that the block following the region is
    /// allocated, so the remainder never needs coalescing.
    unsafe fn split_allocated(&mut self, block: Block, total: usize, asize: usize) {
        unsafe {
            let slack = total - asize;
            if slack >= MIN_BLOCK_SIZE {
                block.set_tags(asize, true);
                let remainder = block.offset(asize);
                remainder.set_tags(slack, false);
                self.free_list.insert(remainder);
            } else {
                block.set_tags(total, true);
            }
        }
    }
}

unsafe fn write_epilogue(epilogue: Block) {
    unsafe { epilogue.header().write(Tag::pack(0, true).raw()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResizePlan {
    InPlace,
    GrowLeft { prev: Block },
    GrowRight { next: Block },
    GrowBoth { prev: Block, next: Block },
    Relocate,
}

impl ResizePlan {
    /// Picks how to resize `block` to `asize` bytes. A free predecessor is
    /// tried before a free successor, and both before relocation.
    unsafe fn choose(block: Block, asize: usize) -> Self {
        unsafe {
            let bsize = block.size();
            if asize <= bsize {
                return Self::InPlace;
            }

            let prev = block.prev();
            let next = block.next();
            let prev_size = (!prev.is_allocated()).then(|| prev.size());
            let next_size = (!next.is_allocated()).then(|| next.size());

            match (prev_size, next_size) {
                (Some(psize), _) if asize <= psize + bsize => Self::GrowLeft { prev },
                (_, Some(nsize)) if asize <= bsize + nsize => Self::GrowRight { next },
                (Some(psize), Some(nsize)) if asize <= psize + bsize + nsize => {
                    Self::GrowBoth { prev, next }
                }
                _ => Self::Relocate,
            }
        }
    }
}

/// A snapshot of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload address of the block.
    pub payload: NonNull<u8>,
    /// Total block size including tags.
    pub size: usize,
    /// Allocation flag.
    pub allocated: bool,
}

impl BlockInfo {
    fn read(block: Block) -> Self {
        let (size, allocated) = unsafe { block.tag().unpack() };
        Self {
            payload: block.payload(),
            size,
            allocated,
        }
    }
}

/// Iterator returned by [`TagHeap::blocks`].
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    next: Option<Block>,
    _heap: PhantomData<&'a ()>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        let info = BlockInfo::read(block);
        if info.size == 0 {
            self.next = None;
            return None;
        }
        self.next = Some(unsafe { block.next() });
        Some(info)
    }
}

/// Iterator returned by [`TagHeap::free_blocks`].
#[derive(Debug, Clone)]
pub struct FreeBlocks<'a> {
    inner: free_list::Iter,
    _heap: PhantomData<&'a ()>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(BlockInfo::read)
    }
}

/// Heap usage figures, in bytes where applicable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes obtained from the provider, sentinels included.
    pub heap_size: usize,
    pub allocated_blocks: usize,
    /// Bytes in allocated blocks, tags included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    /// Bytes in free blocks, tags included.
    pub free_bytes: usize,
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::OwnedRegion;

    const CHUNK: usize = 1 << 12;

    struct TestHeap {
        heap: TagHeap<OwnedRegion>,
    }

    impl TestHeap {
        fn new(capacity: usize) -> Self {
            let heap = TagHeap::with_config(
                OwnedRegion::with_capacity(capacity),
                HeapConfig::new(CHUNK),
            )
            .unwrap();
            Self { heap }
        }

        fn allocate(&mut self, size: usize, fill: u8) -> NonNull<u8> {
            let ptr = self.heap.allocate(size).unwrap().unwrap();
            unsafe {
                ptr.write_bytes(fill, size);
            }
            self.assert_consistent();
            ptr
        }

        unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize, fill: u8) {
            unsafe {
                assert_filled(ptr, size, fill);
                self.heap.free(ptr);
            }
            self.assert_consistent();
        }

        unsafe fn resize(
            &mut self,
            ptr: NonNull<u8>,
            old_size: usize,
            new_size: usize,
            fill: u8,
        ) -> NonNull<u8> {
            let new = unsafe { self.heap.resize(Some(ptr), new_size).unwrap().unwrap() };
            unsafe {
                assert_filled(new, old_size.min(new_size), fill);
                new.write_bytes(fill, new_size);
            }
            self.assert_consistent();
            new
        }

        fn block_size(&self, ptr: NonNull<u8>) -> usize {
            unsafe { Block::from_payload(ptr).size() }
        }

        fn assert_consistent(&self) {
            let violations = self.heap.check();
            assert!(violations.is_empty(), "{violations:?}");
        }
    }

    unsafe fn assert_filled(ptr: NonNull<u8>, size: usize, fill: u8) {
        for i in 0..size {
            assert_eq!(unsafe { ptr.add(i).read() }, fill, "byte {i} changed");
        }
    }

    #[test]
    fn test_init_layout() {
        let heap = TestHeap::new(CHUNK * 4);
        let stats = heap.heap.stats();
        assert_eq!(stats.heap_size, SENTINEL_SIZE + CHUNK);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, CHUNK);
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(heap.heap.free_blocks().count(), 1);
        heap.assert_consistent();
    }

    #[test]
    fn test_init_fails_without_room() {
        let err = TagHeap::with_config(OwnedRegion::with_capacity(CHUNK), HeapConfig::new(CHUNK))
            .err()
            .unwrap();
        assert!(matches!(err, HeapError::Init { .. }), "{err}");

        let err = TagHeap::new(OwnedRegion::with_capacity(WORD_SIZE)).err().unwrap();
        assert!(matches!(err, HeapError::Init { .. }), "{err}");
    }

    #[test]
    fn test_zero_size_allocation() {
        let mut heap = TestHeap::new(CHUNK * 4);
        assert_eq!(heap.heap.allocate(0).unwrap(), None);
        assert_eq!(heap.heap.stats().allocated_blocks, 0);
    }

    #[test]
    fn test_alignment_and_minimum_size() {
        let mut heap = TestHeap::new(CHUNK * 4);
        for size in [1, 7, 8, 15, 16, 17, 31, 100] {
            let ptr = heap.allocate(size, 0x33);
            assert!(ptr.addr().get().is_multiple_of(ALIGNMENT));
            let bsize = heap.block_size(ptr);
            assert!(bsize >= MIN_BLOCK_SIZE);
            assert_eq!(Some(bsize), adjusted_size(size));
            assert!(unsafe { heap.heap.usable_size(ptr) } >= size);
        }
    }

    #[test]
    fn test_reuses_freed_middle_block() {
        let mut heap = TestHeap::new(CHUNK * 4);
        let a = heap.allocate(16, 0x11);
        let b = heap.allocate(32, 0x22);
        let c = heap.allocate(16, 0x33);
        let heap_size = heap.heap.stats().heap_size;

        unsafe {

            heap.free(b, 32, 0x22);

        }
        let d = heap.allocate(24, 0x44);
        assert_eq!(d, b);
        assert_eq!(heap.heap.stats().heap_size, heap_size);

        unsafe {
            assert_filled(a, 16, 0x11);
            assert_filled(c, 16, 0x33);
        }
    }

    #[test]
    fn test_free_coalesces_in_either_order() {
        for reverse in [false, true] {
            let mut heap = TestHeap::new(CHUNK * 4);
            let a = heap.allocate(40, 0x11);
            let b = heap.allocate(40, 0x22);
            let c = heap.allocate(40, 0x33);
            let b_size = heap.block_size(b);
            let c_size = heap.block_size(c);

            unsafe {
                if reverse {
                    heap.free(c, 40, 0x33);
                    heap.free(b, 40, 0x22);
                } else {
                    heap.free(b, 40, 0x22);
                    heap.free(c, 40, 0x33);
                }
            }

            // b, c and the rest of the chunk form a single free block
            let stats = heap.heap.stats();
            assert_eq!(stats.free_blocks, 1);
            assert_eq!(stats.allocated_blocks, 1);
            let free = heap.heap.free_blocks().next().unwrap();
            assert_eq!(free.payload, b);
            assert_eq!(free.size, CHUNK - heap.block_size(a));
            assert!(free.size > b_size + c_size);
        }
    }

    #[test]
    fn test_grows_heap_when_no_fit() {
        let mut heap = TestHeap::new(CHUNK * 8);
        let a = heap.allocate(CHUNK / 2, 0x11);
        let b = heap.allocate(CHUNK, 0x22);
        let stats = heap.heap.stats();
        assert!(stats.heap_size > SENTINEL_SIZE + CHUNK);
        // the trailing free space of the first chunk was merged into b
        assert_eq!(b.addr().get(), a.addr().get() + heap.block_size(a));
        unsafe {
            assert_filled(a, CHUNK / 2, 0x11);
        }
    }

    #[test]
    fn test_large_allocation_extends_by_request() {
        let mut heap = TestHeap::new(CHUNK * 8);
        let _a = heap.allocate(CHUNK - 2 * MIN_BLOCK_SIZE, 0x11);
        let before = heap.heap.stats().heap_size;
        let _b = heap.allocate(3 * CHUNK, 0x22);
        let grown = heap.heap.stats().heap_size - before;
        assert!(grown >= 2 * CHUNK);
        assert!(grown <= adjusted_size(3 * CHUNK).unwrap());
    }

    #[test]
    fn test_out_of_memory() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let err = heap.heap.allocate(CHUNK * 4).unwrap_err();
        assert!(matches!(err, HeapError::Grow { .. }), "{err}");
        heap.assert_consistent();

        // the heap is still usable after a failed growth
        let ptr = heap.allocate(64, 0x55);
        unsafe {
            heap.free(ptr, 64, 0x55);
        }
    }

    #[test]
    fn test_size_overflow() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let err = heap.heap.allocate(usize::MAX).unwrap_err();
        assert!(matches!(err, HeapError::SizeOverflow { .. }), "{err}");
        let err = heap.heap.allocate_zeroed(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, HeapError::SizeOverflow { .. }), "{err}");
    }

    #[test]
    fn test_allocate_zeroed() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let a = heap.allocate(128, 0xff);
        unsafe {
            heap.free(a, 128, 0xff);
        }
        let b = heap.heap.allocate_zeroed(16, 8).unwrap().unwrap();
        assert_eq!(a, b);
        unsafe {
            assert_filled(b, 128, 0);
        }
        assert_eq!(heap.heap.allocate_zeroed(0, 8).unwrap(), None);
    }

    #[test]
    fn test_resize_null_and_zero() {
        let mut heap = TestHeap::new(CHUNK * 2);
        unsafe {
            let ptr = heap.heap.resize(None, 40).unwrap().unwrap();
            assert_eq!(heap.heap.stats().allocated_blocks, 1);
            let same = heap.heap.resize(Some(ptr), 0).unwrap();
            assert_eq!(same, Some(ptr));
            assert_eq!(heap.heap.stats().allocated_blocks, 0);
            assert_eq!(heap.heap.resize(None, 0).unwrap(), None);
        }
        heap.assert_consistent();
    }

    #[test]
    fn test_resize_shrink_in_place() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let a = heap.allocate(256, 0x11);
        let b = heap.allocate(64, 0x22);
        unsafe {
            heap.free(b, 64, 0x22);
            // small reduction keeps the block untouched
            let a2 = heap.resize(a, 256, 250, 0x11);
            assert_eq!(a2, a);
            assert_eq!(Some(heap.block_size(a)), adjusted_size(256));

            // large reduction splits off a remainder merged with the free tail
            let a3 = heap.resize(a, 250, 32, 0x11);
            assert_eq!(a3, a);
            assert_eq!(Some(heap.block_size(a)), adjusted_size(32));
        }
        let stats = heap.heap.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, CHUNK - adjusted_size(32).unwrap());
    }

    #[test]
    fn test_resize_grow_right() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let a = heap.allocate(64, 0x11);
        let b = heap.allocate(256, 0x22);
        let c = heap.allocate(64, 0x33);
        unsafe {
            heap.free(b, 256, 0x22);
            let a2 = heap.resize(a, 64, 200, 0x11);
            assert_eq!(a2, a);
            assert_eq!(Some(heap.block_size(a)), adjusted_size(200));
            assert_filled(c, 64, 0x33);

            // consuming the whole successor when the slack is too small
            let a3 = heap.resize(a, 200, 64 + 256, 0x11);
            assert_eq!(a3, a);
            assert_eq!(
                heap.block_size(a),
                adjusted_size(64).unwrap() + adjusted_size(256).unwrap()
            );
            assert_filled(c, 64, 0x33);
        }
    }

    #[test]
    fn test_resize_grow_left_with_residual() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let a = heap.allocate(256, 0x11);
        let b = heap.allocate(64, 0x22);
        let _c = heap.allocate(64, 0x33);
        let a_size = heap.block_size(a);
        unsafe {
            heap.free(a, 256, 0x11);
            let b2 = heap.resize(b, 64, 128, 0x22);
            assert!(b2 < b);
            assert!(b2 > a);
            assert_eq!(Some(heap.block_size(b2)), adjusted_size(128));
            // the residual predecessor stays free at a's address
            let residual = Block::from_payload(a);
            assert!(!residual.is_allocated());
            assert_eq!(
                residual.size(),
                a_size + adjusted_size(64).unwrap() - adjusted_size(128).unwrap()
            );
        }
    }

    #[test]
    fn test_resize_grow_left_consumes_predecessor() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let a = heap.allocate(32, 0x11);
        let b = heap.allocate(64, 0x22);
        let _c = heap.allocate(64, 0x33);
        let total = heap.block_size(a) + heap.block_size(b);
        unsafe {
            heap.free(a, 32, 0x11);
            let b2 = heap.resize(b, 64, 100, 0x22);
            assert_eq!(b2, a);
            assert_eq!(heap.block_size(b2), total);
        }
        assert_eq!(heap.heap.free_blocks().count(), 1);
    }

    #[test]
    fn test_resize_grow_both() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let a = heap.allocate(64, 0x11);
        let b = heap.allocate(64, 0x22);
        let c = heap.allocate(64, 0x33);
        let d = heap.allocate(64, 0x44);
        let unit = heap.block_size(a);
        unsafe {
            heap.free(a, 64, 0x11);
            heap.free(c, 64, 0x33);
            let b2 = heap.resize(b, 64, 3 * unit - OVERHEAD - ALIGNMENT, 0x22);
            assert_eq!(b2, a);
            assert_eq!(heap.block_size(b2), 3 * unit);
            assert_filled(d, 64, 0x44);
        }
        let stats = heap.heap.stats();
        assert_eq!(stats.allocated_blocks, 2);
    }

    #[test]
    fn test_resize_prefers_predecessor() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let a = heap.allocate(64, 0x11);
        let b = heap.allocate(64, 0x22);
        let c = heap.allocate(64, 0x33);
        let _d = heap.allocate(64, 0x44);
        let unit = heap.block_size(a);
        unsafe {
            heap.free(a, 64, 0x11);
            heap.free(c, 64, 0x33);
            // either neighbor alone has room
            let new_size = unit + ALIGNMENT;
            assert!(adjusted_size(new_size).unwrap() <= 2 * unit);
            let b2 = heap.resize(b, 64, new_size, 0x22);
            assert!(b2 < b);
            assert!(b2 >= a);

            let successor = Block::from_payload(c);
            assert!(!successor.is_allocated());
            assert_eq!(successor.size(), unit);
        }
    }

    #[test]
    fn test_resize_grow_both_leaves_remainder() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let a = heap.allocate(64, 0x11);
        let b = heap.allocate(64, 0x22);
        let c = heap.allocate(64, 0x33);
        let d = heap.allocate(64, 0x44);
        let unit = heap.block_size(a);
        unsafe {
            heap.free(a, 64, 0x11);
            heap.free(c, 64, 0x33);
            let b2 = heap.resize(b, 64, 2 * unit, 0x22);
            assert_eq!(b2, a);
            let asize = adjusted_size(2 * unit).unwrap();
            assert_eq!(heap.block_size(b2), asize);

            let remainder = Block::from_payload(a.add(asize));
            assert!(!remainder.is_allocated());
            assert_eq!(remainder.size(), 3 * unit - asize);
            assert!(remainder.size() >= MIN_BLOCK_SIZE);
            assert!(
                heap.heap
                    .free_blocks()
                    .any(|info| info.payload == remainder.payload())
            );
            assert_eq!(remainder.next().payload(), d);
            assert_filled(d, 64, 0x44);
        }
    }

    #[test]
    fn test_resize_relocates() {
        let mut heap = TestHeap::new(CHUNK * 4);
        let a = heap.allocate(64, 0x11);
        let b = heap.allocate(64, 0x22);
        let c = heap.allocate(64, 0x33);
        let _d = heap.allocate(64, 0x44);
        unsafe {
            heap.free(a, 64, 0x11);
            heap.free(c, 64, 0x33);
            let b2 = heap.resize(b, 64, 1024, 0x22);
            assert!(b2 > c);
        }
        // a, the old b and c merge back into one free block
        let first_free = heap.heap.blocks().next().unwrap();
        assert!(!first_free.allocated);
        assert_eq!(first_free.payload, a);
        assert_eq!(first_free.size, 3 * adjusted_size(64).unwrap());
    }

    #[test]
    fn test_resize_failure_keeps_block() {
        let mut heap = TestHeap::new(CHUNK * 2);
        let a = heap.allocate(64, 0x11);
        let _b = heap.allocate(64, 0x22);
        unsafe {
            let err = heap.heap.resize(Some(a), CHUNK * 4).unwrap_err();
            assert!(matches!(err, HeapError::Grow { .. }), "{err}");
            heap.assert_consistent();
            heap.free(a, 64, 0x11);
        }
    }
}
