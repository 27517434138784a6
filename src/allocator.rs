use std::{cmp, ptr, ptr::NonNull};

use log::{debug, error, trace, warn};

use crate::{
    arena::Arena,
    block::{BlockPtr, adjusted_size},
    coalesce::coalesce,
    config::{ALIGNMENT, Config, DSIZE, MIN_BLOCK_SIZE, NUM_CLASSES, WSIZE},
    error::{ArenaError, HeapError, InitError},
    index::{FreeIndex, classify},
    utils::align,
};

/// Segregated fit allocator over a single growable [`Arena`].
///
/// The heap always looks like this:
///
/// ```text
///  0        8          16         24                               hi - 8     hi
///  +--------+----------+----------+-------+-------+-- ... --+-------+----------+
///  |  pad   | prologue | prologue | block | block |         | block | epilogue |
///  |        |  header  |  footer  |       |       |         |       |  header  |
///  +--------+----------+----------+-------+-------+-- ... --+-------+----------+
/// ```
///
/// Prologue and epilogue are allocated blocks that are never freed, so
/// every real block has two neighbours whose tags can be read. Free blocks
/// are kept in a [`FreeIndex`], and they are coalesced eagerly: after any
/// `free` no two free blocks are next to each other.
///
/// All the metadata lives inside the arena. The allocator state is just the
/// roots of the index and a couple of numbers, so independent instances
/// don't share anything.
pub struct MemAlloc {
    arena: Arena,
    index: FreeIndex,
    /// Minimum amount the heap grows by, aligned to [`ALIGNMENT`].
    chunk_size: usize,
    /// The prologue block.
    prologue: BlockPtr,
}

/// Snapshot of the heap, computed by walking every block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes between the start of the arena and its break pointer.
    pub heap_size: usize,
    pub allocated_blocks: usize,
    /// Bytes in allocated blocks, overhead included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    /// Bytes in free blocks, overhead included.
    pub free_bytes: usize,
    /// Size of the largest free block, overhead included.
    pub largest_free: usize,
}

impl MemAlloc {
    /// Reserves the arena and lays out an empty heap.
    pub fn new(config: Config) -> Result<Self, InitError> {
        let chunk_size = config.validate()?;
        let arena = Arena::reserve(config.max_heap)?;

        let mut allocator = Self {
            arena,
            index: FreeIndex::new(),
            chunk_size,
            prologue: BlockPtr::new(DSIZE),
        };

        allocator.init()?;

        Ok(allocator)
    }

    /// Same as [`MemAlloc::new`] with [`Config::default`].
    pub fn with_defaults() -> Result<Self, InitError> {
        Self::new(Config::default())
    }

    /// Writes the sentinels at the current break and seeds the index with
    /// one chunk. Only failing to get the sentinel words is fatal, if the
    /// first chunk does not fit the heap simply starts empty.
    fn init(&mut self) -> Result<(), InitError> {
        self.index.clear();

        let start = self.arena.extend(4 * WSIZE)?;

        // Alignment padding, prologue header and footer, epilogue header.
        self.arena.write_word(start, 0);
        self.prologue = BlockPtr::new(start + DSIZE);
        self.prologue.set_tags(&mut self.arena, DSIZE, true);
        self.prologue.next(&self.arena).set_header(&mut self.arena, 0, true);

        match self.extend_heap(self.chunk_size) {
            Ok(block) => self.index.insert(&mut self.arena, block),
            Err(err) => warn!("heap starts empty: {err}"),
        }

        debug!(
            "heap initialised: {} bytes, chunk size {}",
            self.arena.heap_size(),
            self.chunk_size
        );

        Ok(())
    }

    /// Throws away every block and starts over with an empty heap. This is
    /// the only way the break pointer moves back.
    ///
    /// Every pointer handed out before becomes dangling.
    pub fn reset(&mut self) -> Result<(), InitError> {
        self.arena.rewind();
        self.init()
    }

    /// Grows the arena by `bytes` (rounded up to [`ALIGNMENT`]) and turns the
    /// new space into a free block, merged with the last block of the heap if
    /// that one was free. The result is not indexed.
    fn extend_heap(&mut self, bytes: usize) -> Result<BlockPtr, ArenaError> {
        let size = align(bytes, ALIGNMENT);

        // The old epilogue header becomes the header of the new block.
        let block = BlockPtr::new(self.arena.extend(size)?);
        block.set_tags(&mut self.arena, size, false);
        block.next(&self.arena).set_header(&mut self.arena, 0, true);

        trace!("extend_heap: {size} bytes at {block:?}, heap is {} bytes", self.arena.heap_size());

        Ok(coalesce(&mut self.arena, &mut self.index, block))
    }

    /// Allocates at least `size` bytes aligned to [`ALIGNMENT`].
    ///
    /// Returns `None` when `size` is zero, when it is too large to be
    /// represented, or when the arena is exhausted.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let Some(asize) = adjusted_size(size) else {
            warn!("malloc({size}): request too large");
            return None;
        };

        let block = match self.index.find_fit(&self.arena, asize) {
            Some(block) => block,
            None => self.grow_and_find(size, asize)?,
        };

        self.place(block, asize);

        let ptr = self.arena.ptr_at(block.offset());
        trace!("malloc({size}) -> {ptr:p} ({} bytes)", block.size(&self.arena));

        Some(ptr)
    }

    /// No free block fits: grow the heap and search once more.
    fn grow_and_find(&mut self, size: usize, asize: usize) -> Option<BlockPtr> {
        let block = match self.extend_heap(cmp::max(asize, self.chunk_size)) {
            Ok(block) => block,
            Err(err) => {
                warn!("malloc({size}) failed: {err}");
                return None;
            }
        };

        self.index.insert(&mut self.arena, block);

        let found = self.index.find_fit(&self.arena, asize);
        if found.is_none() {
            error!("malloc({size}): no fit for {asize} bytes right after growing the heap");
        }
        debug_assert!(found.is_some(), "fit search failed after a successful extension");

        found
    }

    /// Takes the free `block` out of the index and marks `asize` bytes of it
    /// allocated. If what is left can hold a block on its own it is split
    /// off and indexed.
    fn place(&mut self, block: BlockPtr, asize: usize) {
        self.index.remove(&mut self.arena, block);

        let csize = block.size(&self.arena);
        debug_assert!(csize >= asize, "{block:?} is too small for {asize} bytes");

        if csize - asize >= MIN_BLOCK_SIZE {
            block.set_tags(&mut self.arena, asize, true);

            let rest = block.next(&self.arena);
            rest.set_tags(&mut self.arena, csize - asize, false);

            let rest = coalesce(&mut self.arena, &mut self.index, rest);
            self.index.insert(&mut self.arena, rest);
        } else {
            block.set_tags(&mut self.arena, csize, true);
        }
    }

    /// Returns the block of `ptr` to the heap. A null pointer is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this allocator that has
    /// not been freed yet.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        let block = self.block_of(ptr);
        debug_assert!(block.is_allocated(&self.arena), "double free of {ptr:p}");

        let size = block.size(&self.arena);
        block.set_tags(&mut self.arena, size, false);

        let merged = coalesce(&mut self.arena, &mut self.index, block);
        self.index.insert(&mut self.arena, merged);

        trace!("free({ptr:p}) -> {size} bytes, free block of {} bytes", merged.size(&self.arena));
    }

    /// Resizes the allocation at `ptr` to `size` bytes.
    ///
    /// A null `ptr` behaves as [`MemAlloc::malloc`] and a zero `size` as
    /// [`MemAlloc::free`]. When the current block is already big enough the
    /// same pointer is returned, otherwise the contents are moved to a new
    /// block. If that fails `None` is returned and `ptr` stays valid.
    ///
    /// # Safety
    ///
    /// Same as [`MemAlloc::free`].
    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        let Some(old) = NonNull::new(ptr) else {
            return self.malloc(size);
        };

        if size == 0 {
            unsafe { self.free(ptr) };
            return None;
        }

        let block = self.block_of(old);
        let asize = adjusted_size(size)?;

        if block.size(&self.arena) >= asize {
            trace!("realloc({old:p}, {size}) -> fits in place");
            return Some(old);
        }

        let new = self.malloc(size)?;
        let copied = cmp::min(block.capacity(&self.arena), size);

        unsafe {
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), copied);
            self.free(ptr);
        }

        trace!("realloc({old:p}, {size}) -> {new:p}, {copied} bytes moved");

        Some(new)
    }

    /// Allocates zeroed memory for `count` elements of `size` bytes.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let Some(bytes) = count.checked_mul(size) else {
            warn!("calloc({count}, {size}): size overflow");
            return None;
        };

        let ptr = self.malloc(bytes)?;

        // SAFETY: `ptr` was just allocated with room for `bytes` bytes.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, bytes) };

        Some(ptr)
    }

    /// Number of bytes that can be used through `ptr`, at least as many as
    /// were requested.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live pointer returned by this allocator.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.block_of(ptr).capacity(&self.arena)
    }

    /// First byte of the heap and one past its last byte.
    pub fn heap_bounds(&self) -> (NonNull<u8>, NonNull<u8>) {
        (self.arena.ptr_at(self.arena.lo()), self.arena.ptr_at(self.arena.hi()))
    }

    /// Current size of the heap in bytes.
    pub fn heap_size(&self) -> usize {
        self.arena.heap_size()
    }

    #[inline]
    fn block_of(&self, ptr: NonNull<u8>) -> BlockPtr {
        BlockPtr::new(self.arena.offset_of(ptr))
    }

    /// Iterates over every block between the sentinels in address order.
    fn blocks(&self) -> impl Iterator<Item = BlockPtr> + '_ {
        let first = self.prologue.next(&self.arena);

        std::iter::successors(Some(first), |&bp| Some(bp.next(&self.arena)))
            .take_while(|&bp| bp.size(&self.arena) != 0)
    }

    /// Walks the heap and summarises it.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.arena.heap_size(),
            ..Default::default()
        };

        for block in self.blocks() {
            let size = block.size(&self.arena);

            if block.is_allocated(&self.arena) {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += size;
                stats.largest_free = cmp::max(stats.largest_free, size);
            }
        }

        stats
    }

    /// Checks the heap for consistency and returns its [`HeapStats`].
    ///
    /// Every block is checked for alignment, a sane size and matching
    /// boundary tags, no two free blocks may be neighbours, and every free
    /// block has to be in the index exactly once, in the right class and in
    /// tree order.
    pub fn check_heap(&self) -> Result<HeapStats, HeapError> {
        let arena = &self.arena;
        let hi = arena.hi();

        let prologue_tag = self.prologue.header_tag(arena);
        if prologue_tag != DSIZE | 1 || self.prologue.footer_tag(arena) != prologue_tag {
            return Err(HeapError::BadPrologue);
        }

        let mut stats = HeapStats {
            heap_size: arena.heap_size(),
            ..Default::default()
        };
        let mut prev_free = false;
        let mut block = self.prologue.next(arena);

        loop {
            let offset = block.offset();

            if block.header() + WSIZE > hi {
                return Err(HeapError::OutOfBounds { offset });
            }

            let size = block.size(arena);

            if size == 0 {
                if block.header() != hi - WSIZE || !block.is_allocated(arena) {
                    return Err(HeapError::BadEpilogue { offset });
                }
                break;
            }

            if offset % ALIGNMENT != 0 {
                return Err(HeapError::Misaligned { offset });
            }
            if size % ALIGNMENT != 0 || size < MIN_BLOCK_SIZE {
                return Err(HeapError::BadSize { offset, size });
            }
            if offset.checked_add(size).is_none_or(|end| end > hi) {
                return Err(HeapError::OutOfBounds { offset });
            }
            if block.header_tag(arena) != block.footer_tag(arena) {
                return Err(HeapError::TagMismatch { offset });
            }

            if block.is_allocated(arena) {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += size;
                prev_free = false;
            } else {
                if prev_free {
                    return Err(HeapError::Uncoalesced {
                        offset: block.prev(arena).offset(),
                    });
                }
                stats.free_blocks += 1;
                stats.free_bytes += size;
                stats.largest_free = cmp::max(stats.largest_free, size);
                prev_free = true;
            }

            block = block.next(arena);
        }

        let indexed = self.check_index()?;
        if indexed != stats.free_blocks || indexed != self.index.len() {
            return Err(HeapError::IndexMismatch {
                in_heap: stats.free_blocks,
                indexed,
            });
        }

        Ok(stats)
    }

    /// Checks every class tree and returns how many blocks they hold.
    fn check_index(&self) -> Result<usize, HeapError> {
        let arena = &self.arena;
        let mut indexed = 0;

        for class in 0..NUM_CLASSES {
            let mut last = None;
            let mut result = Ok(());

            self.index.for_each_in_class(arena, class, |block| {
                if result.is_err() {
                    return;
                }

                let offset = block.offset();
                let size = block.size(arena);

                result = if block.is_allocated(arena) {
                    Err(HeapError::IndexedAllocated { offset })
                } else if classify(size) != class {
                    Err(HeapError::WrongClass {
                        offset,
                        found: class,
                        expected: classify(size),
                    })
                } else if last.is_some_and(|last| last >= (size, block)) {
                    Err(HeapError::TreeOrder { offset })
                } else {
                    Ok(())
                };

                last = Some((size, block));
                indexed += 1;
            });

            result?;
        }

        Ok(indexed)
    }
}
