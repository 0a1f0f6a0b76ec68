//! Placement of an allocation inside a free block.

use crate::{
    free_list::FreeList,
    tag::{Block, MIN_BLOCK_SIZE},
};

/// Marks `asize` bytes at the start of the listed free `block` as allocated.
///
/// If the remainder can form a block of its own it is split off and takes
/// over `block`'s position in the free list. Otherwise the whole block is
/// unlisted and allocated, accepting the slack as internal fragmentation.
///
/// Returns the allocated block, which always starts at `block`.
///
/// # Safety
///
/// `block` must be a listed free block of at least `asize` bytes, and
/// `asize` must be an aligned size of at least [`MIN_BLOCK_SIZE`].
pub unsafe fn place(free_list: &mut FreeList, block: Block, asize: usize) -> Block {
    unsafe {
        let bsize = block.size();
        debug_assert!(bsize >= asize);

        let remainder_size = bsize - asize;
        if remainder_size >= MIN_BLOCK_SIZE {
            let remainder = block.offset(asize);
            remainder.set_tags(remainder_size, false);
            free_list.replace(block, remainder);
            block.set_tags(asize, true);
        } else {
            free_list.remove(block);
            block.set_tags(bsize, true);
        }
        block
    }
}
