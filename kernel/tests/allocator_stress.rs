// SPDX-License-Identifier: MPL-2.0

//! Long random alloc/free churn against the global slab allocator.

use core::ptr::NonNull;

use azalea_kernel::mm::{kfree, kmalloc};

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

/// One million uniformly-random allocations in [1, 262144] bytes,
/// interleaved with frees of random live allocations; stamped bytes verify
/// that no chunk ever overlaps another.
#[test]
fn million_random_allocations_do_not_corrupt_state() {
    azalea_kernel::init();

    const OPS: usize = 1_000_000;
    const MAX_SIZE: usize = 262_144;
    const MAX_LIVE: usize = 64;

    let mut rng = XorShift(0x6A09_E667_F3BC_C908);
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for _ in 0..OPS {
        let free_one = !live.is_empty() && (live.len() >= MAX_LIVE || rng.next() % 2 == 0);
        if free_one {
            let index = (rng.next() as usize) % live.len();
            let (ptr, size, stamp) = live.swap_remove(index);
            unsafe {
                // The stamped boundary bytes survive every interleaving.
                assert_eq!(*ptr.as_ptr(), stamp);
                assert_eq!(*ptr.as_ptr().add(size - 1), stamp);
                kfree(ptr);
            }
        } else {
            let size = (rng.next() as usize) % MAX_SIZE + 1;
            let stamp = (rng.next() & 0xFF) as u8;
            let ptr = kmalloc(size);
            unsafe {
                *ptr.as_ptr() = stamp;
                *ptr.as_ptr().add(size - 1) = stamp;
            }
            live.push((ptr, size, stamp));
        }
    }

    for (ptr, size, stamp) in live {
        unsafe {
            assert_eq!(*ptr.as_ptr(), stamp);
            assert_eq!(*ptr.as_ptr().add(size - 1), stamp);
            kfree(ptr);
        }
    }
}
