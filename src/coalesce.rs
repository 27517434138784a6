use log::trace;

use crate::{arena::Arena, block::BlockPtr, index::FreeIndex};

/// Merges the free `block` with its free neighbours and returns the merged
/// block, which is **not** inserted into the index. The caller decides
/// whether to index it or to carve an allocation out of it right away.
///
/// `block` must already be marked free and must not be indexed. Neighbours
/// are found through the boundary tags, the prologue and epilogue sentinels
/// are always allocated so we never look outside of the heap:
///
/// ```text
///  Case 1       Case 2            Case 3            Case 4
/// +-------+    +-------+         +-------+         +-------+
/// | alloc |    | alloc |         | free  | <--+    | free  | <--+
/// +-------+    +-------+         +-------+    |    +-------+    |
/// | block |    | block | <--+    | block |  merged | block |  merged
/// +-------+    +-------+  merged +-------+    |    +-------+    |
/// | alloc |    | free  | <--+    | alloc |    |    | free  | <--+
/// +-------+    +-------+         +-------+ ---+    +-------+
/// ```
///
/// Merged neighbours are removed from the index before their tags get
/// overwritten, since the index needs their old size to find them.
pub(crate) fn coalesce(arena: &mut Arena, index: &mut FreeIndex, block: BlockPtr) -> BlockPtr {
    debug_assert!(!block.is_allocated(arena), "coalescing allocated {block:?}");

    let next = block.next(arena);
    let prev_allocated = block.prev_allocated(arena);
    let next_allocated = next.is_allocated(arena);
    let mut size = block.size(arena);

    let merged = match (prev_allocated, next_allocated) {
        // Case 1, nothing to merge.
        (true, true) => return block,

        // Case 2, absorb the next block.
        (true, false) => {
            index.remove(arena, next);
            size += next.size(arena);
            block
        }

        // Case 3, the previous block absorbs this one.
        (false, true) => {
            let prev = block.prev(arena);
            index.remove(arena, prev);
            size += prev.size(arena);
            prev
        }

        // Case 4, the previous block absorbs this one and the next one.
        (false, false) => {
            let prev = block.prev(arena);
            index.remove(arena, prev);
            index.remove(arena, next);
            size += prev.size(arena) + next.size(arena);
            prev
        }
    };

    merged.set_tags(arena, size, false);
    trace!("coalesce: {block:?} merged into {merged:?} ({size} bytes)");

    merged
}
