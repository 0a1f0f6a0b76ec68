//! Heap consistency checker.
//!
//! [`TagHeap::check`] walks the whole heap and the whole free list and
//! reports every invariant it finds broken. It only reads the heap, so it is
//! safe to call between any two operations, and it bounds every walk so a
//! corrupted heap cannot make it loop forever or read outside the region.

use alloc::{collections::BTreeSet, vec::Vec};

use log::warn;

use crate::{
    free_list,
    heap::{PROLOGUE_SIZE, TagHeap},
    provider::HeapProvider,
    tag::{ALIGNMENT, Block, MIN_BLOCK_SIZE, Tag, WORD_SIZE},
};

/// A broken heap invariant. Addresses are payload addresses.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[non_exhaustive]
pub enum Violation {
    #[display("prologue block is damaged: header={header:?}, footer={footer:?}")]
    BadPrologue { header: Tag, footer: Tag },
    #[display("epilogue is damaged or misplaced: block={block:#x}, header={header:?}")]
    BadEpilogue { block: usize, header: Tag },
    #[display("header and footer disagree: block={block:#x}, header={header:?}, footer={footer:?}")]
    TagMismatch {
        block: usize,
        header: Tag,
        footer: Tag,
    },
    #[display("block payload is misaligned: block={block:#x}")]
    Misaligned { block: usize },
    #[display("block is smaller than the minimum block size: block={block:#x}, size={size}")]
    Undersized { block: usize, size: usize },
    #[display("block extends past the heap: block={block:#x}, size={size}, heap_end={heap_end:#x}")]
    OutOfBounds {
        block: usize,
        size: usize,
        heap_end: usize,
    },
    #[display("adjacent blocks are both free: first={first:#x}, second={second:#x}")]
    AdjacentFree { first: usize, second: usize },
    #[display("free block is missing from the free list: block={block:#x}")]
    FreeNotListed { block: usize },
    #[display("free list member is marked allocated: block={block:#x}")]
    ListedNotFree { block: usize },
    #[display("free list member lies outside the heap: block={block:#x}")]
    ListedOutOfBounds { block: usize },
    #[display(
        "free list back link is broken: block={block:#x}, pred={pred:?}, expected={expected:?}"
    )]
    BrokenLink {
        block: usize,
        pred: Option<usize>,
        expected: Option<usize>,
    },
    #[display("free list contains a cycle: block={block:#x}")]
    FreeListCycle { block: usize },
}

struct Bounds {
    start: usize,
    end: usize,
}

impl Bounds {
    /// Whether a block at `block` has its header and both link words inside
    /// the heap.
    fn holds_listed(&self, block: usize) -> bool {
        block.is_multiple_of(ALIGNMENT)
            && block >= self.start + WORD_SIZE
            && block.saturating_add(2 * WORD_SIZE) <= self.end
    }
}

impl<P> TagHeap<P>
where
    P: HeapProvider,
{
    /// Validates the heap and the free list, returning every violation
    /// found. An empty result means the heap is consistent.
    ///
    /// Each violation is also logged as a warning.
    #[must_use]
    pub fn check(&self) -> Vec<Violation> {
        let bounds = Bounds {
            start: self.provider.start().addr().get(),
            end: self.provider.end().addr().get(),
        };
        let mut violations = Vec::new();

        let free_in_heap = unsafe { self.check_blocks(&bounds, &mut violations) };
        let listed = unsafe { self.check_free_list(&bounds, &mut violations) };

        violations.extend(
            free_in_heap
                .difference(&listed)
                .map(|&block| Violation::FreeNotListed { block }),
        );

        for violation in &violations {
            warn!("heap check: {violation}");
        }
        violations
    }

    /// Walks the blocks in address order and returns the addresses of the
    /// free ones.
    unsafe fn check_blocks(
        &self,
        bounds: &Bounds,
        violations: &mut Vec<Violation>,
    ) -> BTreeSet<usize> {
        let mut free = BTreeSet::new();
        unsafe {
            let prologue = self.prologue;
            let (header, footer) = (prologue.tag(), prologue.footer_tag());
            let expected = Tag::pack(PROLOGUE_SIZE, true);
            if header != expected || footer != expected {
                violations.push(Violation::BadPrologue { header, footer });
                return free;
            }

            let mut prev_free: Option<usize> = None;
            let mut block = prologue.next();
            loop {
                let addr = block.addr();
                if addr > bounds.end {
                    violations.push(Violation::OutOfBounds {
                        block: addr,
                        size: 0,
                        heap_end: bounds.end,
                    });
                    break;
                }

                let header = block.tag();
                let size = header.size();
                if size == 0 {
                    if !header.is_allocated() || addr != bounds.end {
                        violations.push(Violation::BadEpilogue {
                            block: addr,
                            header,
                        });
                    }
                    break;
                }
                if (addr - WORD_SIZE).saturating_add(size) > bounds.end {
                    violations.push(Violation::OutOfBounds {
                        block: addr,
                        size,
                        heap_end: bounds.end,
                    });
                    break;
                }

                if !addr.is_multiple_of(ALIGNMENT) {
                    violations.push(Violation::Misaligned { block: addr });
                }
                if size < MIN_BLOCK_SIZE {
                    violations.push(Violation::Undersized { block: addr, size });
                }
                let footer = block.footer_tag();
                if footer != header {
                    violations.push(Violation::TagMismatch {
                        block: addr,
                        header,
                        footer,
                    });
                }

                if header.is_allocated() {
                    prev_free = None;
                } else {
                    if let Some(first) = prev_free {
                        violations.push(Violation::AdjacentFree {
                            first,
                            second: addr,
                        });
                    }
                    free.insert(addr);
                    prev_free = Some(addr);
                }
                block = block.next();
            }
        }
        free
    }

    /// Walks the free list and returns the addresses of its members.
    unsafe fn check_free_list(
        &self,
        bounds: &Bounds,
        violations: &mut Vec<Violation>,
    ) -> BTreeSet<usize> {
        let mut listed = BTreeSet::new();
        let mut expected_pred = None;
        let mut next = self.free_list.head();

        while let Some(block) = next {
            let addr = block.addr();
            if !bounds.holds_listed(addr) {
                violations.push(Violation::ListedOutOfBounds { block: addr });
                break;
            }
            if !listed.insert(addr) {
                violations.push(Violation::FreeListCycle { block: addr });
                break;
            }

            unsafe {
                if block.is_allocated() {
                    violations.push(Violation::ListedNotFree { block: addr });
                }
                let pred = free_list::pred(block).map(Block::addr);
                if pred != expected_pred {
                    violations.push(Violation::BrokenLink {
                        block: addr,
                        pred,
                        expected: expected_pred,
                    });
                }
                next = free_list::succ(block);
            }
            expected_pred = Some(addr);
        }
        listed
    }
}
