use crate::tag::{ALIGNMENT, MIN_BLOCK_SIZE};

/// Default growth quantum in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Tuning knobs for a [`TagHeap`](crate::TagHeap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    chunk_size: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl HeapConfig {
    /// Creates a configuration that grows the heap by at least `chunk_size`
    /// bytes at a time.
    ///
    /// The quantum is rounded up to a multiple of
    /// [`ALIGNMENT`](crate::tag::ALIGNMENT) and to at least
    /// [`MIN_BLOCK_SIZE`](crate::tag::MIN_BLOCK_SIZE).
    #[must_use]
    pub const fn new(chunk_size: usize) -> Self {
        let chunk_size = if chunk_size < MIN_BLOCK_SIZE {
            MIN_BLOCK_SIZE
        } else {
            chunk_size.next_multiple_of(ALIGNMENT)
        };
        Self { chunk_size }
    }

    /// Returns the growth quantum in bytes.
    ///
    /// The heap is extended by this many bytes at initialization and by at
    /// least this many bytes whenever no free block fits a request.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_normalization() {
        assert_eq!(HeapConfig::default().chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(HeapConfig::new(0).chunk_size(), MIN_BLOCK_SIZE);
        assert_eq!(HeapConfig::new(MIN_BLOCK_SIZE + 1).chunk_size(), MIN_BLOCK_SIZE + ALIGNMENT);
        assert_eq!(HeapConfig::new(1000).chunk_size() % ALIGNMENT, 0);
    }
}
