//! Boundary-tag coalescing of adjacent free blocks.

use crate::{free_list::FreeList, tag::Block};

/// Merges a free, unlisted `block` with its free physical neighbors and
/// lists the result.
///
/// Exactly one of four cases applies:
///
/// | predecessor | successor | result |
/// |-------------|-----------|--------|
/// | allocated   | allocated | `block` is listed as is |
/// | allocated   | free      | `block` absorbs the successor |
/// | free        | allocated | the predecessor absorbs `block` |
/// | free        | free      | the predecessor absorbs both |
///
/// Returns the merged block, which starts at the predecessor when the
/// predecessor was free.
///
/// # Safety
///
/// `block` must carry valid free tags and must not be listed. Both
/// physical neighbors must carry valid tags, which the prologue and
/// epilogue guarantee at the heap edges.
pub unsafe fn coalesce(free_list: &mut FreeList, block: Block) -> Block {
    unsafe {
        let prev = block.prev();
        let next = block.next();
        let prev_free = !prev.is_allocated();
        let next_free = !next.is_allocated();
        let mut size = block.size();

        let merged = match (prev_free, next_free) {
            (false, false) => block,
            (false, true) => {
                free_list.remove(next);
                size += next.size();
                block
            }
            (true, false) => {
                free_list.remove(prev);
                size += prev.size();
                prev
            }
            (true, true) => {
                free_list.remove(prev);
                free_list.remove(next);
                size += prev.size() + next.size();
                prev
            }
        };

        merged.set_tags(size, false);
        free_list.insert(merged);
        merged
    }
}
