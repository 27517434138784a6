use thiserror::Error;

/// Errors produced by the [`crate::arena::Arena`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("failed to reserve {size} bytes from the operating system")]
    ReserveFailed { size: usize },

    #[error("arena exhausted (requested: {requested} bytes, available: {available} bytes)")]
    Exhausted { requested: usize, available: usize },
}

/// Errors that make [`crate::MemAlloc::new`] fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Arena(#[from] ArenaError),
}

/// Inconsistencies found by [`crate::MemAlloc::check_heap`]. Every variant
/// carries the payload offset of the offending block.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeapError {
    #[error("bad prologue block")]
    BadPrologue,

    #[error("bad epilogue header at offset {offset:#x}")]
    BadEpilogue { offset: usize },

    #[error("block at {offset:#x} is not aligned")]
    Misaligned { offset: usize },

    #[error("block at {offset:#x} has invalid size {size}")]
    BadSize { offset: usize, size: usize },

    #[error("block at {offset:#x} header and footer disagree")]
    TagMismatch { offset: usize },

    #[error("block at {offset:#x} runs past the end of the heap")]
    OutOfBounds { offset: usize },

    #[error("free blocks at {offset:#x} and its successor were not coalesced")]
    Uncoalesced { offset: usize },

    #[error("indexed block at {offset:#x} is marked allocated")]
    IndexedAllocated { offset: usize },

    #[error("indexed block at {offset:#x} sits in class {found}, expected {expected}")]
    WrongClass {
        offset: usize,
        found: usize,
        expected: usize,
    },

    #[error("class tree ordering broken at {offset:#x}")]
    TreeOrder { offset: usize },

    #[error("{in_heap} free blocks in the heap but {indexed} in the index")]
    IndexMismatch { in_heap: usize, indexed: usize },
}
