use std::fmt;

use crate::{
    arena::Arena,
    config::{ALIGNMENT, DSIZE, MIN_BLOCK_SIZE, WSIZE},
    utils::checked_align,
};

/// Bit of a boundary tag telling whether the block is allocated. Sizes are
/// multiples of [`ALIGNMENT`], so the low bits of a tag are free for flags.
const ALLOCATED: usize = 0x1;

/// Mask that removes the flag bits from a boundary tag.
const SIZE_MASK: usize = !(ALIGNMENT - 1);

/// A block lives inside the [`Arena`] and is identified by the offset of its
/// payload (`bp`). Size and status are stored in the block itself, in a
/// boundary tag duplicated at both ends:
///
/// ```text
///            Allocated block                       Free block
///
///  bp - 8  +--------------------+ <--+       +--------------------+
///          |   size   |  a = 1  |    |       |   size   |  a = 0  |  header
///  bp      +--------------------+    |       +--------------------+
///          |                    |    |       |  left  (offset)    |  link
///          |      payload       |  size      +--------------------+
///          |                    |    |       |  right (offset)    |  link
///          |                    |    |       +--------------------+
///          |                    |    |       |     (unused)       |
///          +--------------------+    |       +--------------------+
///          |   size   |  a = 1  |    |       |   size   |  a = 0  |  footer
///          +--------------------+ <--+       +--------------------+
/// ```
///
/// The same payload bytes are read in two ways depending on the allocated
/// flag. While the block is allocated they belong to the user and we never
/// touch them. Once it is free they become the two links of the size class
/// tree the block is stored in (see [`crate::index`]). Crossing from one view
/// to the other only happens in [`BlockPtr::set_tags`], and the link
/// accessors assert that the block really is free.
///
/// The footer lets us walk backwards: the word right before a header is the
/// footer of the previous block, which holds its size.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BlockPtr(usize);

impl fmt::Debug for BlockPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockPtr({:#x})", self.0)
    }
}

/// Packs a size and an allocated bit into a boundary tag.
#[inline]
pub(crate) fn pack(size: usize, allocated: bool) -> usize {
    debug_assert_eq!(size & !SIZE_MASK, 0, "size {size} collides with flag bits");
    size | if allocated { ALLOCATED } else { 0 }
}

/// Size of the block a request of `size` bytes needs, overhead and
/// alignment included. `None` when the arithmetic would overflow.
#[inline]
pub(crate) fn adjusted_size(size: usize) -> Option<usize> {
    let asize = checked_align(size.checked_add(DSIZE)?, ALIGNMENT)?;
    Some(asize.max(MIN_BLOCK_SIZE))
}

/// Encoding of a missing link. Offset 0 is the alignment padding word of the
/// heap so no payload can ever start there.
const NIL: usize = 0;

#[inline]
fn decode_link(word: usize) -> Option<BlockPtr> {
    match word {
        NIL => None,
        bp => Some(BlockPtr(bp)),
    }
}

impl BlockPtr {
    #[inline]
    pub fn new(bp: usize) -> Self {
        debug_assert!(bp % ALIGNMENT == 0, "payload {bp:#x} is not aligned");
        Self(bp)
    }

    /// Offset of the payload inside the arena.
    #[inline]
    pub fn offset(self) -> usize {
        self.0
    }

    /// Offset of the header word.
    #[inline]
    pub fn header(self) -> usize {
        self.0 - WSIZE
    }

    /// Offset of the footer word.
    #[inline]
    pub fn footer(self, arena: &Arena) -> usize {
        self.0 + self.size(arena) - DSIZE
    }

    #[inline]
    pub fn size(self, arena: &Arena) -> usize {
        arena.read_word(self.header()) & SIZE_MASK
    }

    #[inline]
    pub fn is_allocated(self, arena: &Arena) -> bool {
        arena.read_word(self.header()) & ALLOCATED != 0
    }

    /// Size stored in the footer. Only differs from [`BlockPtr::size`] on a
    /// corrupted heap.
    #[inline]
    pub fn footer_tag(self, arena: &Arena) -> usize {
        arena.read_word(self.footer(arena))
    }

    #[inline]
    pub fn header_tag(self, arena: &Arena) -> usize {
        arena.read_word(self.header())
    }

    /// Next block in address order.
    #[inline]
    pub fn next(self, arena: &Arena) -> BlockPtr {
        BlockPtr(self.0 + self.size(arena))
    }

    /// Previous block in address order, found through its footer.
    #[inline]
    pub fn prev(self, arena: &Arena) -> BlockPtr {
        let prev_size = arena.read_word(self.0 - DSIZE) & SIZE_MASK;
        BlockPtr(self.0 - prev_size)
    }

    /// Tells whether the block right before this one is allocated, reading
    /// only its footer.
    #[inline]
    pub fn prev_allocated(self, arena: &Arena) -> bool {
        arena.read_word(self.0 - DSIZE) & ALLOCATED != 0
    }

    /// Writes both boundary tags of the block.
    #[inline]
    pub fn set_tags(self, arena: &mut Arena, size: usize, allocated: bool) {
        let tag = pack(size, allocated);
        arena.write_word(self.header(), tag);
        arena.write_word(self.0 + size - DSIZE, tag);
    }

    /// Writes only a header. Used for the epilogue, which has no footer.
    #[inline]
    pub fn set_header(self, arena: &mut Arena, size: usize, allocated: bool) {
        arena.write_word(self.header(), pack(size, allocated));
    }

    /// Number of payload bytes the user can use.
    #[inline]
    pub fn capacity(self, arena: &Arena) -> usize {
        self.size(arena) - DSIZE
    }

    #[inline]
    pub fn left(self, arena: &Arena) -> Option<BlockPtr> {
        self.link(arena, 0)
    }

    #[inline]
    pub fn right(self, arena: &Arena) -> Option<BlockPtr> {
        self.link(arena, WSIZE)
    }

    #[inline]
    pub fn set_left(self, arena: &mut Arena, left: Option<BlockPtr>) {
        self.set_link(arena, 0, left);
    }

    #[inline]
    pub fn set_right(self, arena: &mut Arena, right: Option<BlockPtr>) {
        self.set_link(arena, WSIZE, right);
    }

    /// `left` and `right` links read as they are, whatever the allocated
    /// flag says.
    #[inline]
    pub fn tree_links(self, arena: &Arena) -> (Option<BlockPtr>, Option<BlockPtr>) {
        (
            decode_link(arena.read_word(self.0)),
            decode_link(arena.read_word(self.0 + WSIZE)),
        )
    }

    #[inline]
    fn link(self, arena: &Arena, at: usize) -> Option<BlockPtr> {
        debug_assert!(!self.is_allocated(arena), "{self:?} is allocated, it has no links");

        decode_link(arena.read_word(self.0 + at))
    }

    #[inline]
    fn set_link(self, arena: &mut Arena, at: usize, link: Option<BlockPtr>) {
        debug_assert!(!self.is_allocated(arena), "{self:?} is allocated, it has no links");

        arena.write_word(self.0 + at, link.map_or(NIL, BlockPtr::offset));
    }
}
