use std::ptr::NonNull;

use segalloc::MemAlloc;

fn log_alloc(size: usize, addr: Option<NonNull<u8>>) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    env_logger::init();

    let mut allocator = MemAlloc::with_defaults().expect("failed to set up the heap");

    let addr1 = allocator.malloc(8);
    log_alloc(8, addr1);

    let addr2 = allocator.malloc(100);
    log_alloc(100, addr2);

    let addr3 = allocator.malloc(200);
    log_alloc(200, addr3);

    unsafe {
        allocator.free(addr2.map_or(std::ptr::null_mut(), NonNull::as_ptr));
    }

    // Fits in the block of `addr2`.
    let addr4 = allocator.malloc(90);
    log_alloc(90, addr4);
    println!("Reused freed block: {}", addr2 == addr4);

    for addr in [addr1, addr3, addr4].into_iter().flatten() {
        unsafe { allocator.free(addr.as_ptr()) };
    }

    println!("{:#?}", allocator.check_heap());
}
