//! The whole test binary runs on `HugePool` as its global allocator, so
//! every allocation made here goes through the process-global context.

use hugepool::{HugePool, PoolKind};
use std::alloc::{alloc, alloc_zeroed, dealloc, realloc, GlobalAlloc, Layout};
use std::thread;

#[global_allocator]
static GLOBAL: HugePool = HugePool;

const KIB: usize = 1 << 10;
const MIB: usize = 1 << 20;

fn pooled(ptr: *const u8) -> bool {
    hugepool::init::context().pool_of(ptr).is_some()
}

#[test]
fn small_values_stay_with_the_system_allocator() {
    let b = Box::new(42u64);
    let v: Vec<u32> = (0..1000).collect();
    let s = String::from("routed below the threshold");

    assert!(!pooled(&*b as *const u64 as *const u8));
    assert!(!pooled(v.as_ptr() as *const u8));
    assert!(!pooled(s.as_ptr()));
    assert_eq!(v[999], 999);
}

#[test]
fn zero_sized_layouts_are_dangling() {
    unsafe {
        let layout = Layout::from_size_align(0, 32).unwrap();
        let p = GLOBAL.alloc(layout);
        assert_eq!(p as usize, 32);
        assert!(!pooled(p));
        GLOBAL.dealloc(p, layout);
    }
    let v: Vec<()> = vec![(); 100];
    assert_eq!(v.len(), 100);
}

#[test]
fn pooled_layout_is_zeroed_and_cache_aligned() {
    unsafe {
        let layout = Layout::from_size_align(4 * MIB, 64).unwrap();
        let p = alloc_zeroed(layout);
        assert!(!p.is_null());
        assert!(pooled(p));
        assert_eq!(p as usize % 64, 0);
        let bytes = std::slice::from_raw_parts(p, 4 * MIB);
        assert!(bytes.iter().all(|&b| b == 0));
        dealloc(p, layout);
    }
}

#[test]
fn page_aligned_layout_skips_the_pools() {
    unsafe {
        let layout = Layout::from_size_align(4 * MIB, 4 * KIB).unwrap();
        let p = alloc(layout);
        assert!(!p.is_null());
        assert_eq!(p as usize % (4 * KIB), 0);
        assert!(!pooled(p));
        p.add(4 * MIB - 1).write(0x42);
        dealloc(p, layout);
    }
}

#[test]
fn over_aligned_realloc_moves_by_hand() {
    unsafe {
        let layout = Layout::from_size_align(64, 128).unwrap();
        let p = alloc(layout);
        assert!(!p.is_null());
        p.write(0xAB);

        let grown = realloc(p, layout, 4 * MIB);
        assert!(!grown.is_null());
        assert_eq!(grown as usize % 128, 0);
        assert!(!pooled(grown), "align 128 is above what pools serve");
        assert_eq!(grown.read(), 0xAB);

        dealloc(grown, Layout::from_size_align(4 * MIB, 128).unwrap());
    }
}

#[test]
fn large_buffers_come_from_a_pool() {
    let ctx = hugepool::init::context();
    let mut v = vec![0u8; 8 * MIB];
    assert_eq!(ctx.pool_of(v.as_ptr()), Some(PoolKind::Anonymous));
    assert!(v.iter().all(|&b| b == 0));
    v[8 * MIB - 1] = 7;

    // Growth past the block moves the data within the pools.
    v.resize(24 * MIB, 9);
    assert!(ctx.pool_of(v.as_ptr()).is_some());
    assert_eq!(v[8 * MIB - 1], 7);
    assert_eq!(v[24 * MIB - 1], 9);
}

#[test]
fn shrinking_a_pooled_buffer_stays_in_place() {
    let mut v: Vec<u8> = Vec::with_capacity(8 * MIB);
    v.extend(std::iter::repeat(3).take(3 * MIB));
    let before = v.as_ptr();
    assert!(pooled(before));

    v.shrink_to_fit();
    assert_eq!(v.as_ptr(), before);
    assert!(v.iter().all(|&b| b == 3));
}

#[test]
fn fallback_buffer_growing_into_pool() {
    let mut v: Vec<u64> = Vec::with_capacity(16);
    v.extend(0..16);
    assert!(!pooled(v.as_ptr() as *const u8));
    v.reserve_exact(MIB);
    assert!(pooled(v.as_ptr() as *const u8));
    assert!(v.iter().copied().eq(0..16));
}

#[test]
fn pooled_buffers_from_many_threads() {
    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            thread::spawn(move || {
                for round in 0..8 {
                    let size = 2 * MIB + usize::from(t) * 256 * KIB + round * KIB;
                    let v = vec![t; size];
                    assert!(pooled(v.as_ptr()));
                    assert_eq!(v[size - 1], t);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread panicked");
    }
}
