//! A boundary-tag heap allocator with an explicit free list.
//!
//! [`TagHeap`] manages a single contiguous region obtained from a
//! [`HeapProvider`], which grows like `sbrk` and never shrinks. Every block
//! carries a size tag at both ends, so the physical neighbors of any block
//! can be found in O(1), and free blocks are threaded onto a LIFO doubly
//! linked list stored inside the free blocks themselves.
//!
//! # Operations
//!
//! - [`TagHeap::allocate`] does a first-fit scan of the free list, splitting
//!   off the unused tail of the chosen block. When nothing fits the heap is
//!   grown by at least [`HeapConfig::chunk_size`] bytes.
//! - [`TagHeap::free`] merges the block with free neighbors immediately, so
//!   no two free blocks are ever adjacent.
//! - [`TagHeap::resize`] shrinks in place, or grows by absorbing a free
//!   predecessor, a free successor or both, and moves the block only when
//!   none of those fit.
//! - [`TagHeap::check`] validates the whole heap and reports every broken
//!   invariant as a [`Violation`].
//!
//! # Examples
//!
//! ```
//! use tagheap::{HeapConfig, OwnedRegion, TagHeap};
//!
//! let region = OwnedRegion::with_capacity(1 << 16);
//! let mut heap = TagHeap::with_config(region, HeapConfig::new(1 << 12)).unwrap();
//!
//! let a = heap.allocate(16).unwrap().unwrap();
//! let b = heap.allocate(32).unwrap().unwrap();
//! unsafe {
//!     heap.free(a);
//!     heap.free(b);
//! }
//!
//! // both blocks merged back into the single free block
//! assert_eq!(heap.free_blocks().count(), 1);
//! assert!(heap.check().is_empty());
//! ```
//!
//! # Thread Safety
//!
//! A heap is `Send` when its provider is, but not `Sync`. Concurrent use
//! needs external synchronization.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub mod check;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod free_list;
pub mod heap;
pub mod place;
pub mod provider;
pub mod tag;

pub use self::{
    check::Violation,
    config::{DEFAULT_CHUNK_SIZE, HeapConfig},
    error::{HeapError, Location},
    heap::{BlockInfo, Blocks, FreeBlocks, HeapStats, TagHeap},
    provider::{ExtendError, HeapProvider, OwnedRegion, RawRegion},
};
