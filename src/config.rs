//! Allocator tunables and the fixed constants of the block layout.

use crate::{
    error::InitError,
    kernel::page_size,
    utils::checked_align,
};

/// Word size in bytes. Headers, footers and free-block links are one word.
pub const WSIZE: usize = std::mem::size_of::<usize>();

/// Double word size in bytes. This is the per-block overhead (header + footer).
pub const DSIZE: usize = 2 * WSIZE;

/// Every payload pointer handed out is a multiple of this.
pub const ALIGNMENT: usize = 16;

/// Smallest block we can create: header, two tree links and a footer.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Number of segregated size classes.
pub const NUM_CLASSES: usize = 20;

/// Default reservation for the arena (20 MiB).
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// Default amount the heap grows by when no free block fits (4 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Runtime configuration of a [`crate::MemAlloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of bytes the arena may ever grow to.
    pub max_heap: usize,
    /// Minimum number of bytes requested from the arena on every extension.
    pub chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_heap: DEFAULT_MAX_HEAP,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    pub fn with_max_heap(mut self, max_heap: usize) -> Self {
        self.max_heap = max_heap;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Checks the configuration and returns the chunk size rounded up to
    /// [`ALIGNMENT`].
    pub(crate) fn validate(&self) -> Result<usize, InitError> {
        if self.chunk_size < MIN_BLOCK_SIZE {
            return Err(InitError::InvalidConfig("chunk_size is below the minimum block size"));
        }

        if self.chunk_size > self.max_heap {
            return Err(InitError::InvalidConfig("chunk_size exceeds max_heap"));
        }

        let chunk_size = checked_align(self.chunk_size, ALIGNMENT)
            .ok_or(InitError::InvalidConfig("chunk_size is too large"))?;

        // The sentinels and the first chunk have to fit in the reservation,
        // otherwise no allocation could ever succeed.
        let reserved = checked_align(self.max_heap, page_size()).unwrap_or(usize::MAX);
        if chunk_size.checked_add(4 * WSIZE).is_none_or(|needed| needed > reserved) {
            return Err(InitError::InvalidConfig(
                "max_heap cannot hold the sentinels and one chunk",
            ));
        }

        Ok(chunk_size)
    }
}
