//! # segalloc
//!
//! A `malloc` / `free` allocator working on a simulated heap: a single
//! region reserved once from the kernel and handed out through a break
//! pointer that only moves forward, the way `sbrk` does.
//!
//! ```text
//!   segalloc
//!   ├── arena      - the simulated heap and its break pointer
//!   ├── block      - boundary tags and free block links (internal)
//!   ├── index      - segregated size class trees of free blocks (internal)
//!   ├── coalesce   - merging of neighbouring free blocks (internal)
//!   ├── allocator  - MemAlloc: malloc, free, realloc, heap checker
//!   ├── config     - tunables and layout constants
//!   └── error      - error types
//! ```
//!
//! Blocks carry their own metadata, a size + allocated tag at both ends,
//! and free blocks reuse their payload to link themselves into the index,
//! so the allocator needs no memory besides the heap it manages.
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::MemAlloc;
//!
//! let mut allocator = MemAlloc::with_defaults().unwrap();
//!
//! let ptr = allocator.malloc(100).unwrap();
//! unsafe {
//!     ptr.as_ptr().write(42);
//!     assert_eq!(ptr.as_ptr().read(), 42);
//!     allocator.free(ptr.as_ptr());
//! }
//!
//! allocator.check_heap().unwrap();
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: `MemAlloc` is neither `Send` nor `Sync`.
//! - **The heap never shrinks**: freed memory is reused, never returned.

pub mod arena;
mod allocator;
mod block;
mod coalesce;
pub mod config;
pub mod error;
mod index;
mod kernel;
mod utils;

pub use allocator::{HeapStats, MemAlloc};
pub use config::Config;
pub use error::{ArenaError, HeapError, InitError};
