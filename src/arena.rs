use std::ptr::NonNull;

use log::{debug, warn};

use crate::{
    config::WSIZE,
    error::ArenaError,
    kernel::{page_size, request_memory, return_memory},
    utils::checked_align,
};

/// Simulated heap. It models the classic `sbrk` interface on top of a single
/// region reserved once from the kernel:
///
/// ```text
///  base                        base + brk                base + size
///   |                              |                          |
///   v                              v                          v
///   +------------------------------+--------------------------+
///   |  committed (owned by heap)   |    reserved, not in use  |
///   +------------------------------+--------------------------+
///   ^                              ^
///   lo()                           hi()
/// ```
///
/// Everything above the arena talks in byte offsets from `base` instead of
/// raw pointers, so the bounds of every metadata access can be checked here.
pub struct Arena {
    /// Start of the reservation. It is page aligned.
    base: NonNull<u8>,
    /// Size of the reservation in bytes.
    size: usize,
    /// Offset of the first byte past the committed heap.
    brk: usize,
}

impl Arena {
    /// Reserves `max_bytes` (rounded up to the page size) from the kernel.
    /// This is the only moment the arena talks to the operating system.
    pub fn reserve(max_bytes: usize) -> Result<Self, ArenaError> {
        let size = checked_align(max_bytes.max(1), page_size())
            .ok_or(ArenaError::ReserveFailed { size: max_bytes })?;

        let base = unsafe { request_memory(size) }.ok_or(ArenaError::ReserveFailed { size })?;

        debug!("reserved arena of {size} bytes at {:p}", base.as_ptr());

        Ok(Self { base, size, brk: 0 })
    }

    /// Moves the break pointer `incr` bytes forward and returns the old
    /// break. The heap cannot be shrunk through this function.
    pub fn extend(&mut self, incr: usize) -> Result<usize, ArenaError> {
        let available = self.size - self.brk;

        if incr > available {
            warn!("arena exhausted: requested {incr} bytes, {available} left");
            return Err(ArenaError::Exhausted {
                requested: incr,
                available,
            });
        }

        let old_brk = self.brk;
        self.brk += incr;

        Ok(old_brk)
    }

    /// Moves the break pointer back to the start of the arena. Everything
    /// handed out before becomes invalid.
    pub(crate) fn rewind(&mut self) {
        debug!("rewinding arena ({} bytes in use)", self.brk);
        self.brk = 0;
    }

    /// Lowest valid offset.
    #[inline]
    pub fn lo(&self) -> usize {
        0
    }

    /// One past the highest valid offset.
    #[inline]
    pub fn hi(&self) -> usize {
        self.brk
    }

    /// Size of the reservation, the most the heap can ever grow to.
    #[inline]
    pub fn max_size(&self) -> usize {
        self.size
    }

    /// Number of committed bytes.
    #[inline]
    pub fn heap_size(&self) -> usize {
        self.brk - self.lo()
    }

    /// Tells whether `offset` lies inside the committed heap.
    #[inline]
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.lo() && offset < self.hi()
    }

    /// Reads the word stored at `offset`.
    #[inline]
    pub fn read_word(&self, offset: usize) -> usize {
        self.check_word(offset);

        // SAFETY: `offset` is word aligned and the whole word lies inside the
        // committed part of the reservation, which stays mapped while `self`
        // is alive.
        unsafe { self.base.as_ptr().add(offset).cast::<usize>().read() }
    }

    /// Writes `value` at `offset`.
    #[inline]
    pub fn write_word(&mut self, offset: usize, value: usize) {
        self.check_word(offset);

        // SAFETY: see `read_word`.
        unsafe { self.base.as_ptr().add(offset).cast::<usize>().write(value) }
    }

    /// Converts an offset into a pointer the user can dereference.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.brk, "offset {offset:#x} past the break");

        // SAFETY: `offset` is inside the reservation so the result is inside
        // the same allocation as `base` and can't be null.
        unsafe { self.base.add(offset) }
    }

    /// Converts a pointer previously obtained from [`Arena::ptr_at`] back
    /// into its offset.
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> usize {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;

        debug_assert!(
            addr.checked_sub(base).is_some_and(|offset| self.contains(offset)),
            "pointer {ptr:p} does not belong to this arena"
        );

        addr - base
    }

    #[inline]
    fn check_word(&self, offset: usize) {
        debug_assert!(offset % WSIZE == 0, "unaligned word access at {offset:#x}");
        debug_assert!(
            offset >= self.lo() && offset + WSIZE <= self.hi(),
            "word access at {offset:#x} outside of [{:#x}, {:#x})",
            self.lo(),
            self.hi()
        );
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { return_memory(self.base, self.size) }
    }
}
