use std::{collections::HashSet, ptr::NonNull};

use segalloc::{Config, MemAlloc};
use test_log::test;

fn allocator() -> MemAlloc {
    MemAlloc::with_defaults().unwrap()
}

unsafe fn fill(ptr: NonNull<u8>, len: usize, pattern: u8) {
    unsafe { ptr.as_ptr().write_bytes(pattern, len) };
}

unsafe fn holds(ptr: NonNull<u8>, len: usize, pattern: u8) -> bool {
    unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
        .iter()
        .all(|&b| b == pattern)
}

#[test]
fn freed_block_is_reused() {
    let mut allocator = allocator();

    let a = allocator.malloc(100).unwrap();
    let b = allocator.malloc(200).unwrap();
    let heap = allocator.heap_size();

    unsafe { allocator.free(a.as_ptr()) };

    let c = allocator.malloc(90).unwrap();

    assert_eq!(a, c);
    assert_ne!(b, c);
    assert_eq!(allocator.heap_size(), heap);
    allocator.check_heap().unwrap();
}

#[test]
fn adjacent_frees_are_coalesced() {
    const N: usize = 16;
    let mut allocator = allocator();

    let blocks: Vec<_> = (0..N).map(|_| allocator.malloc(32).unwrap()).collect();
    // Keeps the run from merging with the rest of the chunk.
    let _fence = allocator.malloc(32).unwrap();

    for pair in blocks.windows(2) {
        assert!(pair[0] < pair[1], "blocks are laid out in address order");
    }

    for ptr in &blocks {
        unsafe { allocator.free(ptr.as_ptr()) };
    }

    let stats = allocator.check_heap().unwrap();
    // The run of N blocks plus the tail of the chunk.
    assert_eq!(stats.free_blocks, 2);

    let heap = allocator.heap_size();
    let big = allocator.malloc(32 * N).unwrap();

    assert_eq!(big, blocks[0]);
    assert_eq!(allocator.heap_size(), heap);
    allocator.check_heap().unwrap();
}

#[test]
fn coalescing_in_either_order() {
    for reversed in [false, true] {
        let mut allocator = allocator();

        let a = allocator.malloc(48).unwrap();
        let b = allocator.malloc(48).unwrap();
        let _fence = allocator.malloc(48).unwrap();

        let usable = unsafe { allocator.usable_size(a) + allocator.usable_size(b) };

        unsafe {
            if reversed {
                allocator.free(b.as_ptr());
                allocator.free(a.as_ptr());
            } else {
                allocator.free(a.as_ptr());
                allocator.free(b.as_ptr());
            }
        }

        let heap = allocator.heap_size();
        // Both blocks together also give back the overhead of one of them.
        let merged = allocator.malloc(usable).unwrap();

        assert_eq!(merged, a);
        assert_eq!(allocator.heap_size(), heap);
        allocator.check_heap().unwrap();
    }
}

#[test]
fn reuse_after_free_keeps_other_blocks_intact() {
    let mut allocator = allocator();

    let a = allocator.malloc(64).unwrap();
    let b = allocator.malloc(64).unwrap();
    let c = allocator.malloc(64).unwrap();

    unsafe {
        fill(a, 64, 0xAA);
        fill(b, 64, 0xBB);
        fill(c, 64, 0xCC);

        allocator.free(b.as_ptr());

        let d = allocator.malloc(64).unwrap();
        assert_eq!(b, d);
        fill(d, 64, 0xDD);

        assert!(holds(a, 64, 0xAA));
        assert!(holds(c, 64, 0xCC));
        assert!(holds(d, 64, 0xDD));
    }

    allocator.check_heap().unwrap();
}

#[test]
fn pointers_are_aligned_and_in_bounds() {
    let mut allocator = allocator();

    for size in 1..300 {
        let ptr = allocator.malloc(size).unwrap();
        let (lo, hi) = allocator.heap_bounds();

        assert_eq!(ptr.as_ptr() as usize % 16, 0);
        assert!(ptr > lo);
        assert!(unsafe { ptr.as_ptr().add(size) } <= hi.as_ptr());
    }

    allocator.check_heap().unwrap();
}

#[test]
fn live_allocations_never_overlap() {
    let mut allocator = allocator();
    let mut live = Vec::new();

    for i in 0..200usize {
        let size = 1 + (i * 37) % 500;
        live.push((allocator.malloc(size).unwrap(), size));

        if i % 3 == 0 {
            let (ptr, _) = live.swap_remove(i % live.len());
            unsafe { allocator.free(ptr.as_ptr()) };
        }
    }

    let mut ranges: Vec<_> = live
        .iter()
        .map(|&(ptr, size)| (ptr.as_ptr() as usize, ptr.as_ptr() as usize + size))
        .collect();
    ranges.sort();

    for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0);
    }

    let distinct: HashSet<_> = live.iter().map(|(ptr, _)| *ptr).collect();
    assert_eq!(distinct.len(), live.len());

    allocator.check_heap().unwrap();
}

#[test]
fn heap_only_grows() {
    let mut allocator = allocator();
    let mut top = allocator.heap_bounds().1;
    let mut live = Vec::new();

    for i in 1..100 {
        live.push(allocator.malloc(i * 97).unwrap());
        if i % 4 == 0 {
            let ptr = live.remove(0);
            unsafe { allocator.free(ptr.as_ptr()) };
        }

        let hi = allocator.heap_bounds().1;
        assert!(hi >= top);
        top = hi;
    }
}

#[test]
fn everything_freed_is_one_block() {
    let mut allocator = allocator();

    let ptrs: Vec<_> = (1..64).map(|i| allocator.malloc(i * 24).unwrap()).collect();

    // Free every other block first, then the rest.
    for ptr in ptrs.iter().step_by(2).chain(ptrs.iter().skip(1).step_by(2)) {
        unsafe { allocator.free(ptr.as_ptr()) };
    }

    let stats = allocator.check_heap().unwrap();
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.largest_free, stats.free_bytes);
}

#[test]
fn exhausted_heap_recovers_after_free() {
    let config = Config::default().with_max_heap(64 * 1024).with_chunk_size(1024);
    let mut allocator = MemAlloc::new(config).unwrap();
    let mut live = Vec::new();

    while let Some(ptr) = allocator.malloc(1000) {
        live.push(ptr);
    }

    assert!(!live.is_empty());
    assert!(allocator.heap_size() <= 64 * 1024);

    let ptr = live.pop().unwrap();
    unsafe { allocator.free(ptr.as_ptr()) };

    assert_eq!(allocator.malloc(1000), Some(ptr));
    allocator.check_heap().unwrap();
}

#[test]
fn instances_are_independent() {
    let mut first = allocator();
    let mut second = allocator();

    let a = first.malloc(128).unwrap();
    let b = second.malloc(128).unwrap();

    assert_ne!(a, b);

    unsafe { first.free(a.as_ptr()) };

    assert_eq!(first.stats().allocated_blocks, 0);
    assert_eq!(second.stats().allocated_blocks, 1);
}

#[test]
fn invalid_config_is_rejected() {
    assert!(MemAlloc::new(Config::default().with_chunk_size(0)).is_err());
    assert!(
        MemAlloc::new(Config::default().with_max_heap(4096).with_chunk_size(8192)).is_err()
    );
}
