//! Boundary tags and block address arithmetic.
//!
//! Every block carries the same one-word tag at both ends. The tag stores
//! the total block size with the allocation flag packed into the low bit,
//! which is always free because block sizes are multiples of [`ALIGNMENT`].
//!
//! ```text
//! Block Layout:
//!                 payload pointer
//!                       │
//!                       ▼
//! ┌────────────────────┬────────────────────────────┬────────────────────┐
//! │ header: size | a   │ payload                    │ footer: size | a   │
//! └────────────────────┴────────────────────────────┴────────────────────┘
//! │◀─────────────────────────── size bytes ───────────────────────────▶│
//! ```
//!
//! A free block reuses the first two payload words for its free-list links
//! (see [`free_list`](crate::free_list)), which is why even an allocated
//! block is never smaller than [`MIN_BLOCK_SIZE`].

use core::{fmt, ptr::NonNull};

/// Size of a single boundary tag in bytes.
pub const WORD_SIZE: usize = size_of::<usize>();

/// Alignment of every payload address and every block size.
pub const ALIGNMENT: usize = 2 * WORD_SIZE;

/// Bytes of every block spent on the header and footer tags.
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Smallest block able to hold both tags and both free-list links.
pub const MIN_BLOCK_SIZE: usize = 4 * WORD_SIZE;

const _: () = assert!(ALIGNMENT.is_power_of_two() && ALIGNMENT >= 2);
const _: () = assert!(MIN_BLOCK_SIZE.is_multiple_of(ALIGNMENT));

const ALLOCATED_BIT: usize = 0x1;
const SIZE_MASK: usize = !(ALIGNMENT - 1);

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
///
/// Returns `None` if the rounded value does not fit in `usize`.
#[must_use]
pub const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGNMENT - 1) {
        Some(size) => Some(size & SIZE_MASK),
        None => None,
    }
}

/// Computes the block size needed to serve a request of `payload` bytes.
///
/// The result accounts for the tags, is aligned, and is never smaller than
/// [`MIN_BLOCK_SIZE`].
#[must_use]
pub const fn adjusted_size(payload: usize) -> Option<usize> {
    let Some(size) = payload.checked_add(OVERHEAD) else {
        return None;
    };
    match align_up(size) {
        Some(size) if size < MIN_BLOCK_SIZE => Some(MIN_BLOCK_SIZE),
        other => other,
    }
}

/// A packed `(size, allocated)` boundary tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(usize);

impl Tag {
    /// Packs a block size and an allocation flag into one word.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a multiple of [`ALIGNMENT`].
    #[must_use]
    pub const fn pack(size: usize, allocated: bool) -> Self {
        assert!(size & !SIZE_MASK == 0, "block size must be aligned");
        Self(size | if allocated { ALLOCATED_BIT } else { 0 })
    }

    /// Reinterprets a raw word read from the heap as a tag.
    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw word stored in the heap.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Returns the block size encoded in this tag.
    #[must_use]
    pub const fn size(self) -> usize {
        self.0 & SIZE_MASK
    }

    /// Returns `true` if the block is allocated.
    #[must_use]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED_BIT != 0
    }

    /// Splits the tag into its `(size, allocated)` parts.
    #[must_use]
    pub const fn unpack(self) -> (usize, bool) {
        (self.size(), self.is_allocated())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

/// A block identified by its payload address.
///
/// `Block` is a plain address; all accessors read or write the tags in the
/// heap and are therefore `unsafe`. The caller must guarantee the block is
/// part of a well-formed heap: its header is valid, and for [`prev`] the
/// preceding block's footer is valid too.
///
/// [`prev`]: Self::prev
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(NonNull<u8>);

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({:#x})", self.addr())
    }
}

impl Block {
    /// Wraps a payload pointer.
    #[must_use]
    pub const fn from_payload(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    /// Returns the payload pointer handed out to callers.
    #[must_use]
    pub const fn payload(self) -> NonNull<u8> {
        self.0
    }

    /// Returns the payload address.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.addr().get()
    }

    /// Returns the location of the header tag.
    #[must_use]
    pub fn header(self) -> *mut usize {
        self.0.as_ptr().wrapping_sub(WORD_SIZE).cast()
    }

    /// Returns the location of the footer tag.
    ///
    /// # Safety
    ///
    /// The header must be valid.
    #[must_use]
    pub unsafe fn footer(self) -> *mut usize {
        unsafe { self.footer_for(self.size()) }
    }

    /// Returns where the footer would be if the block had `size` bytes.
    ///
    /// # Safety
    ///
    /// `size` must be at least [`OVERHEAD`].
    #[must_use]
    pub unsafe fn footer_for(self, size: usize) -> *mut usize {
        debug_assert!(size >= OVERHEAD);
        unsafe { self.0.as_ptr().add(size - OVERHEAD).cast() }
    }

    /// Reads the header tag.
    ///
    /// # Safety
    ///
    /// The header must be valid.
    #[must_use]
    pub unsafe fn tag(self) -> Tag {
        unsafe { Tag::from_raw(self.header().read()) }
    }

    /// Reads the footer tag.
    ///
    /// # Safety
    ///
    /// The header must be valid.
    #[must_use]
    pub unsafe fn footer_tag(self) -> Tag {
        unsafe { Tag::from_raw(self.footer().read()) }
    }

    /// Returns the total block size from the header.
    ///
    /// # Safety
    ///
    /// The header must be valid.
    #[must_use]
    pub unsafe fn size(self) -> usize {
        unsafe { self.tag().size() }
    }

    /// Returns the allocation flag from the header.
    ///
    /// # Safety
    ///
    /// The header must be valid.
    #[must_use]
    pub unsafe fn is_allocated(self) -> bool {
        unsafe { self.tag().is_allocated() }
    }

    /// Writes matching header and footer tags for a block of `size` bytes.
    ///
    /// # Safety
    ///
    /// `[header, header + size)` must lie inside the heap and must not
    /// overlap payload bytes that are still needed.
    pub unsafe fn set_tags(self, size: usize, allocated: bool) {
        let tag = Tag::pack(size, allocated);
        unsafe {
            self.header().write(tag.raw());
            self.footer_for(size).write(tag.raw());
        }
    }

    /// Returns the physically following block.
    ///
    /// # Safety
    ///
    /// The header must be valid.
    #[must_use]
    pub unsafe fn next(self) -> Self {
        unsafe { Self(self.0.add(self.size())) }
    }

    /// Returns the physically preceding block.
    ///
    /// # Safety
    ///
    /// The preceding block's footer must be valid.
    #[must_use]
    #[expect(clippy::cast_ptr_alignment)]
    pub unsafe fn prev(self) -> Self {
        unsafe {
            let prev_footer = self.0.as_ptr().sub(OVERHEAD).cast::<usize>();
            let prev_size = Tag::from_raw(prev_footer.read()).size();
            Self(self.0.sub(prev_size))
        }
    }

    /// Returns the block starting `offset` bytes after this one.
    ///
    /// # Safety
    ///
    /// The resulting address must stay inside the heap.
    #[must_use]
    pub unsafe fn offset(self, offset: usize) -> Self {
        unsafe { Self(self.0.add(offset)) }
    }
}
