//! Explicit free list embedded in free blocks.
//!
//! The list is doubly linked and LIFO ordered: freed blocks are pushed at the
//! head, so the most recently freed block is the first candidate for reuse.
//! The links live in the first two payload words of each free block, so the
//! list needs no storage of its own.
//!
//! ```text
//! Free Block Layout:
//! ┌────────┬──────────────────┬──────────────────┬──────────┬────────┐
//! │ header │ pred: *mut u8    │ succ: *mut u8    │ (unused) │ footer │
//! └────────┴──────────────────┴──────────────────┴──────────┴────────┘
//!          ▲
//!          └── payload pointer
//! ```
//!
//! Unlinking is O(1) because every member knows both of its neighbors.
//! Searching is a linear first-fit scan.

use core::ptr::{self, NonNull};

use crate::tag::{Block, WORD_SIZE};

const PRED_OFFSET: usize = 0;
const SUCC_OFFSET: usize = WORD_SIZE;

fn link_slot(block: Block, offset: usize) -> *mut *mut u8 {
    block.payload().as_ptr().wrapping_add(offset).cast()
}

unsafe fn read_link(block: Block, offset: usize) -> Option<Block> {
    let raw = unsafe { link_slot(block, offset).read() };
    NonNull::new(raw).map(Block::from_payload)
}

unsafe fn write_link(block: Block, offset: usize, link: Option<Block>) {
    let raw = link.map_or(ptr::null_mut(), |b| b.payload().as_ptr());
    unsafe { link_slot(block, offset).write(raw) }
}

/// Returns the predecessor of a listed block.
///
/// # Safety
///
/// `block` must currently be a member of a free list.
#[must_use]
pub unsafe fn pred(block: Block) -> Option<Block> {
    unsafe { read_link(block, PRED_OFFSET) }
}

/// Returns the successor of a listed block.
///
/// # Safety
///
/// `block` must currently be a member of a free list.
#[must_use]
pub unsafe fn succ(block: Block) -> Option<Block> {
    unsafe { read_link(block, SUCC_OFFSET) }
}

/// Head of an intrusive, LIFO-ordered free list.
#[derive(Debug, Default)]
pub struct FreeList {
    head: Option<Block>,
}

impl FreeList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Returns the first block of the list.
    #[must_use]
    pub fn head(&self) -> Option<Block> {
        self.head
    }

    /// Returns `true` if no block is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Pushes `block` at the head of the list.
    ///
    /// # Safety
    ///
    /// `block` must be a free block of at least
    /// [`MIN_BLOCK_SIZE`](crate::tag::MIN_BLOCK_SIZE) bytes that is not
    /// already listed.
    pub unsafe fn insert(&mut self, block: Block) {
        unsafe {
            write_link(block, PRED_OFFSET, None);
            write_link(block, SUCC_OFFSET, self.head);
            if let Some(head) = self.head {
                write_link(head, PRED_OFFSET, Some(block));
            }
        }
        self.head = Some(block);
    }

    /// Unlinks `block` from the list.
    ///
    /// # Safety
    ///
    /// `block` must be a member of this list.
    pub unsafe fn remove(&mut self, block: Block) {
        unsafe {
            let pred = pred(block);
            let succ = succ(block);
            match pred {
                Some(pred) => write_link(pred, SUCC_OFFSET, succ),
                None => self.head = succ,
            }
            if let Some(succ) = succ {
                write_link(succ, PRED_OFFSET, pred);
            }
        }
    }

    /// Puts `new` at the list position currently held by `old`.
    ///
    /// Used when a listed block is split and its remainder stays free: the
    /// remainder inherits the original links instead of moving to the head.
    ///
    /// # Safety
    ///
    /// `old` must be a member of this list, `new` must not be, and the link
    /// words of `new` must not overlap those of `old`.
    pub unsafe fn replace(&mut self, old: Block, new: Block) {
        unsafe {
            let pred = pred(old);
            let succ = succ(old);
            write_link(new, PRED_OFFSET, pred);
            write_link(new, SUCC_OFFSET, succ);
            match pred {
                Some(pred) => write_link(pred, SUCC_OFFSET, Some(new)),
                None => self.head = Some(new),
            }
            if let Some(succ) = succ {
                write_link(succ, PRED_OFFSET, Some(new));
            }
        }
    }

    /// Returns the first listed block whose size is at least `min_size`.
    ///
    /// # Safety
    ///
    /// Every listed block must have a valid header.
    #[must_use]
    pub unsafe fn find_first_fit(&self, min_size: usize) -> Option<Block> {
        unsafe { self.iter().find(|block| block.size() >= min_size) }
    }

    /// Iterates over the listed blocks in list order.
    ///
    /// # Safety
    ///
    /// The links of every listed block must be intact for as long as the
    /// iterator is used.
    #[must_use]
    #[expect(clippy::iter_without_into_iter)]
    pub unsafe fn iter(&self) -> Iter {
        Iter { next: self.head }
    }
}

/// Iterator over the members of a [`FreeList`].
#[derive(Debug, Clone)]
pub struct Iter {
    next: Option<Block>,
}

impl Iterator for Iter {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        self.next = unsafe { succ(block) };
        Some(block)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::MIN_BLOCK_SIZE;

    const BLOCKS: usize = 4;

    #[repr(C, align(16))]
    struct Arena([u8; BLOCKS * MIN_BLOCK_SIZE + 2 * WORD_SIZE]);

    fn with_free_blocks<F>(test_fn: F)
    where
        F: FnOnce(&mut FreeList, [Block; BLOCKS]),
    {
        let mut arena = Arena([0; BLOCKS * MIN_BLOCK_SIZE + 2 * WORD_SIZE]);
        let base = NonNull::from(&mut arena.0).cast::<u8>();
        unsafe {
            let first = Block::from_payload(base.add(2 * WORD_SIZE));
            let blocks: [Block; BLOCKS] =
                core::array::from_fn(|i| first.offset(i * MIN_BLOCK_SIZE));
            for block in blocks {
                block.set_tags(MIN_BLOCK_SIZE, false);
            }
            let mut list = FreeList::new();
            test_fn(&mut list, blocks);
        }
    }

    fn collect(list: &FreeList) -> Vec<Block> {
        unsafe { list.iter().collect() }
    }

    #[test]
    fn test_insert_is_lifo() {
        with_free_blocks(|list, [a, b, c, _]| unsafe {
            assert!(list.is_empty());
            list.insert(a);
            list.insert(b);
            list.insert(c);
            assert_eq!(collect(list), [c, b, a]);
            assert_eq!(list.head(), Some(c));
            assert_eq!(pred(c), None);
            assert_eq!(pred(a), Some(b));
            assert_eq!(succ(a), None);
        });
    }

    #[test]
    fn test_remove_head_middle_tail() {
        with_free_blocks(|list, [a, b, c, d]| unsafe {
            for block in [a, b, c, d] {
                list.insert(block);
            }
            list.remove(c);
            assert_eq!(collect(list), [d, b, a]);
            list.remove(d);
            assert_eq!(collect(list), [b, a]);
            assert_eq!(pred(b), None);
            list.remove(a);
            assert_eq!(collect(list), [b]);
            assert_eq!(succ(b), None);
            list.remove(b);
            assert!(list.is_empty());
        });
    }

    #[test]
    fn test_replace_keeps_position() {
        with_free_blocks(|list, [a, b, c, d]| unsafe {
            list.insert(a);
            list.insert(b);
            list.insert(c);
            list.replace(b, d);
            assert_eq!(collect(list), [c, d, a]);
            assert_eq!(pred(a), Some(d));
            assert_eq!(succ(c), Some(d));

            list.replace(c, b);
            assert_eq!(collect(list), [b, d, a]);
            assert_eq!(list.head(), Some(b));
        });
    }

    #[test]
    fn test_find_first_fit() {
        with_free_blocks(|list, [a, b, c, _]| unsafe {
            list.insert(a);
            list.insert(b);
            list.insert(c);
            // c was inserted last and is found first among equal fits
            assert_eq!(list.find_first_fit(MIN_BLOCK_SIZE), Some(c));
            assert_eq!(list.find_first_fit(MIN_BLOCK_SIZE + 1), None);
        });
    }
}
