use log::trace;

use crate::{
    arena::Arena,
    block::BlockPtr,
    config::{MIN_BLOCK_SIZE, NUM_CLASSES},
};

/// Segregated index of free [`BlockPtr`]s.
///
/// Free blocks are split into [`NUM_CLASSES`] size classes. Class `0` keeps
/// blocks of at most [`MIN_BLOCK_SIZE`] bytes and every following class
/// doubles the limit, the last one catching everything larger:
///
/// ```text
///  class:     0       1        2         3              NUM_CLASSES - 1
///          +------+-------+--------+---------+--- ... ---+------------+
///  sizes:  | <=32 | 33-64 | 65-128 | 129-256 |           |  > 8 MiB   |
///          +--|---+-------+---|----+---------+--- ... ---+------------+
///             |               |
///            root            root
///           /    \          /    \
///        ...      ...    ...      ...
/// ```
///
/// Each class is a binary search tree ordered by `(size, address)`. Ordering
/// by address on equal sizes makes every key unique, so the shape of a tree
/// only depends on the sequence of operations. Trees are not balanced, the
/// cost of every operation is bounded by the depth of one class tree.
///
/// The tree nodes are the free blocks themselves: the `left` and `right`
/// links are written in the payload of the block (see [`BlockPtr::left`]).
/// The index itself only stores the roots. Every walk is iterative.
pub(crate) struct FreeIndex {
    roots: [Option<BlockPtr>; NUM_CLASSES],
    len: usize,
}

/// Maps a block size to its class by doubling a limit, starting at
/// [`MIN_BLOCK_SIZE`], until the size fits under it.
pub(crate) fn classify(size: usize) -> usize {
    let mut class = 0;
    let mut limit = MIN_BLOCK_SIZE;

    while class < NUM_CLASSES - 1 && limit < size {
        limit <<= 1;
        class += 1;
    }

    class
}

#[inline]
fn key(arena: &Arena, block: BlockPtr) -> (usize, BlockPtr) {
    (block.size(arena), block)
}

impl FreeIndex {
    /// Creates a new index with every class empty.
    pub const fn new() -> Self {
        Self {
            roots: [None; NUM_CLASSES],
            len: 0,
        }
    }

    /// Forgets every block. The blocks themselves are not touched.
    pub fn clear(&mut self) {
        self.roots = [None; NUM_CLASSES];
        self.len = 0;
    }

    /// Number of indexed blocks.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Inserts a free `block` in the tree of its class. The block must be
    /// marked free already and must not be indexed.
    pub fn insert(&mut self, arena: &mut Arena, block: BlockPtr) {
        debug_assert!(!block.is_allocated(arena), "inserting allocated {block:?}");

        let size = block.size(arena);
        let class = classify(size);
        let new_key = (size, block);

        block.set_left(arena, None);
        block.set_right(arena, None);

        let Some(mut current) = self.roots[class] else {
            self.roots[class] = Some(block);
            self.len += 1;
            trace!("index: {block:?} ({size} bytes) is the root of class {class}");
            return;
        };

        loop {
            debug_assert_ne!(current, block, "{block:?} is already indexed");

            if new_key < key(arena, current) {
                match current.left(arena) {
                    Some(left) => current = left,
                    None => {
                        current.set_left(arena, Some(block));
                        break;
                    }
                }
            } else {
                match current.right(arena) {
                    Some(right) => current = right,
                    None => {
                        current.set_right(arena, Some(block));
                        break;
                    }
                }
            }
        }

        self.len += 1;
        trace!("index: inserted {block:?} ({size} bytes) in class {class}");
    }

    /// Unlinks `block` from the tree of the class its current size maps to.
    ///
    /// # Panics
    ///
    /// If the block is not indexed. Callers only remove blocks they know are
    /// free, so reaching that point means the heap is corrupted.
    pub fn remove(&mut self, arena: &mut Arena, block: BlockPtr) {
        let size = block.size(arena);
        let class = classify(size);
        let target = (size, block);

        // Find the block remembering who points to it.
        let mut parent = None;
        let mut current = self.roots[class];

        loop {
            match current {
                None => panic!("{block:?} ({size} bytes) is not in free class {class}"),
                Some(node) if node == block => break,
                Some(node) => {
                    parent = Some(node);
                    current = if target < key(arena, node) {
                        node.left(arena)
                    } else {
                        node.right(arena)
                    };
                }
            }
        }

        let replacement = match (block.left(arena), block.right(arena)) {
            (None, child) | (child, None) => child,
            (Some(left), Some(right)) => {
                // Two children: the smallest node of the right subtree takes
                // the place of the removed block.
                let mut successor_parent = block;
                let mut successor = right;

                while let Some(next) = successor.left(arena) {
                    successor_parent = successor;
                    successor = next;
                }

                if successor_parent != block {
                    successor_parent.set_left(arena, successor.right(arena));
                    successor.set_right(arena, Some(right));
                }
                successor.set_left(arena, Some(left));

                Some(successor)
            }
        };

        match parent {
            None => self.roots[class] = replacement,
            Some(parent) if parent.left(arena) == Some(block) => parent.set_left(arena, replacement),
            Some(parent) => parent.set_right(arena, replacement),
        }

        self.len -= 1;
        trace!("index: removed {block:?} ({size} bytes) from class {class}");
    }

    /// Finds a free block of at least `asize` bytes without removing it.
    ///
    /// Classes are probed in increasing order starting at `classify(asize)`.
    /// Inside a class the tree gives us the smallest block that fits, lowest
    /// address first on ties, so the policy is best fit within a class and
    /// first fit across classes.
    pub fn find_fit(&self, arena: &Arena, asize: usize) -> Option<BlockPtr> {
        (classify(asize)..NUM_CLASSES).find_map(|class| self.best_in_class(arena, class, asize))
    }

    fn best_in_class(&self, arena: &Arena, class: usize, asize: usize) -> Option<BlockPtr> {
        let mut best = None;
        let mut current = self.roots[class];

        while let Some(node) = current {
            if node.size(arena) >= asize {
                best = Some(node);
                current = node.left(arena);
            } else {
                current = node.right(arena);
            }
        }

        best
    }

    /// Calls `f` with every block of `class` in ascending `(size, address)`
    /// order. Links are read without checking the allocated flag, so the
    /// heap checker can walk an index holding a corrupted block.
    pub fn for_each_in_class(&self, arena: &Arena, class: usize, mut f: impl FnMut(BlockPtr)) {
        let mut stack = Vec::new();
        let mut current = self.roots[class];

        while current.is_some() || !stack.is_empty() {
            while let Some(node) = current {
                stack.push(node);
                current = node.tree_links(arena).0;
            }

            if let Some(node) = stack.pop() {
                f(node);
                current = node.tree_links(arena).1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ALIGNMENT;
    use test_log::test;

    /// Lays out free blocks of the given sizes back to back, each one
    /// separated by a small allocated block so they never look adjacent.
    fn heap_of(sizes: &[usize]) -> (Arena, Vec<BlockPtr>) {
        let mut arena = Arena::reserve(1 << 20).unwrap();
        let total: usize = sizes.iter().map(|s| s + MIN_BLOCK_SIZE).sum();
        arena.extend(total + ALIGNMENT).unwrap();

        let mut blocks = Vec::new();
        let mut bp = BlockPtr::new(ALIGNMENT);

        for &size in sizes {
            bp.set_tags(&mut arena, size, false);
            blocks.push(bp);

            let spacer = bp.next(&arena);
            spacer.set_tags(&mut arena, MIN_BLOCK_SIZE, true);
            bp = spacer.next(&arena);
        }

        (arena, blocks)
    }

    fn class_contents(index: &FreeIndex, arena: &Arena, class: usize) -> Vec<BlockPtr> {
        let mut contents = Vec::new();
        index.for_each_in_class(arena, class, |bp| contents.push(bp));
        contents
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(0), 0);
        assert_eq!(classify(32), 0);
        assert_eq!(classify(33), 1);
        assert_eq!(classify(64), 1);
        assert_eq!(classify(65), 2);
        assert_eq!(classify(128), 2);
        assert_eq!(classify(4096), 7);
        assert_eq!(classify(usize::MAX), NUM_CLASSES - 1);
    }

    #[test]
    fn classify_is_monotonic() {
        let mut last = 0;
        for size in (0..1 << 16).step_by(16) {
            let class = classify(size);
            assert!(class >= last);
            last = class;
        }
    }

    #[test]
    fn insert_keeps_class_sorted() {
        let (mut arena, blocks) = heap_of(&[96, 80, 112, 80, 128]);
        let mut index = FreeIndex::new();

        for &bp in &blocks {
            index.insert(&mut arena, bp);
        }

        assert_eq!(index.len(), 5);
        // Equal sizes are ordered by address.
        assert_eq!(
            class_contents(&index, &arena, 2),
            vec![blocks[1], blocks[3], blocks[0], blocks[2], blocks[4]]
        );
    }

    #[test]
    fn remove_leaf_inner_and_root() {
        let (mut arena, blocks) = heap_of(&[96, 80, 112, 80, 96, 112, 128]);
        let mut index = FreeIndex::new();

        for &bp in &blocks {
            index.insert(&mut arena, bp);
        }

        // Root with two children.
        index.remove(&mut arena, blocks[0]);
        // Leaf.
        index.remove(&mut arena, blocks[3]);
        // Inner node with one child.
        index.remove(&mut arena, blocks[2]);

        assert_eq!(index.len(), 4);
        assert_eq!(
            class_contents(&index, &arena, 2),
            vec![blocks[1], blocks[4], blocks[5], blocks[6]]
        );

        for bp in [blocks[1], blocks[4], blocks[5], blocks[6]] {
            index.remove(&mut arena, bp);
        }

        assert_eq!(index.len(), 0);
        assert!(class_contents(&index, &arena, 2).is_empty());
    }

    #[test]
    fn find_fit_returns_smallest_adequate_in_class() {
        let (mut arena, blocks) = heap_of(&[128, 80, 112, 96]);
        let mut index = FreeIndex::new();

        for &bp in &blocks {
            index.insert(&mut arena, bp);
        }

        assert_eq!(index.find_fit(&arena, 90), Some(blocks[3]));
        assert_eq!(index.find_fit(&arena, 112), Some(blocks[2]));
        assert_eq!(index.find_fit(&arena, 65), Some(blocks[1]));
        // Nothing in class 3 or above.
        assert_eq!(index.find_fit(&arena, 160), None);
    }

    #[test]
    fn find_fit_moves_to_larger_classes() {
        let (mut arena, blocks) = heap_of(&[48, 1024]);
        let mut index = FreeIndex::new();

        for &bp in &blocks {
            index.insert(&mut arena, bp);
        }

        assert_eq!(index.find_fit(&arena, 48), Some(blocks[0]));
        assert_eq!(index.find_fit(&arena, 64), Some(blocks[1]));
        assert_eq!(index.find_fit(&arena, 2048), None);
    }

    #[test]
    #[should_panic]
    fn removing_unindexed_block_panics() {
        let (mut arena, blocks) = heap_of(&[96, 80]);
        let mut index = FreeIndex::new();

        index.insert(&mut arena, blocks[0]);
        index.remove(&mut arena, blocks[1]);
    }
}
