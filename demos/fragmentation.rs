//! Allocates a lot of differently sized blocks, frees half of them and
//! prints how the heap looks before and after freeing the rest.

use segalloc::{Config, MemAlloc};

fn main() {
    env_logger::init();

    let config = Config::default().with_chunk_size(8 * 1024);
    let mut allocator = MemAlloc::new(config).expect("failed to set up the heap");

    let ptrs: Vec<_> = (1..=512)
        .map(|i| allocator.malloc((i * 31) % 1500 + 1).expect("heap exhausted"))
        .collect();

    for ptr in ptrs.iter().step_by(2) {
        unsafe { allocator.free(ptr.as_ptr()) };
    }

    let stats = allocator.check_heap().expect("corrupted heap");
    println!("Half freed:   {stats:#?}");
    println!(
        "Fragmentation: {:.1}%",
        100.0 * (1.0 - stats.largest_free as f64 / stats.free_bytes as f64)
    );

    for ptr in ptrs.iter().skip(1).step_by(2) {
        unsafe { allocator.free(ptr.as_ptr()) };
    }

    println!("All freed:    {:#?}", allocator.check_heap().expect("corrupted heap"));
}
