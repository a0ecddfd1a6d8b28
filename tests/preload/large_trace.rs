/// LD_PRELOAD driver for the interposing build.
///
/// Replays large-allocation patterns through the C allocator API and checks
/// that data survives and that mode changes made via `hugepool_set_mode`
/// take effect.
///
/// Run with: cargo build --release -p hugepool --features interpose && \
///           rustc -O tests/preload/large_trace.rs -o target/large_trace && \
///           HUGEPOOL_LOG=info LD_PRELOAD=target/release/libhugepool.so target/large_trace

use std::ffi::c_void;

extern "C" {
    fn malloc(size: usize) -> *mut u8;
    fn calloc(nmemb: usize, size: usize) -> *mut u8;
    fn realloc(ptr: *mut u8, size: usize) -> *mut u8;
    fn free(ptr: *mut u8);
    fn dlsym(handle: *mut c_void, symbol: *const u8) -> *mut c_void;
}

const RTLD_DEFAULT: *mut c_void = std::ptr::null_mut();
const MIB: usize = 1 << 20;
const ANON_POOL: u32 = 0x2;
const NAMED_POOL: u32 = 0x4;

type SetModeFn = unsafe extern "C" fn(u32) -> u32;

fn set_mode_fn() -> Option<SetModeFn> {
    let sym = unsafe { dlsym(RTLD_DEFAULT, b"hugepool_set_mode\0".as_ptr()) };
    if sym.is_null() {
        None
    } else {
        Some(unsafe { std::mem::transmute::<*mut c_void, SetModeFn>(sym) })
    }
}

/// Seeded LCG so every run replays the same trace.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

unsafe fn fill(p: *mut u8, size: usize, tag: u8) {
    *p = tag;
    *p.add(size / 2) = tag;
    *p.add(size - 1) = tag;
}

unsafe fn check(p: *mut u8, size: usize, tag: u8) {
    assert_eq!(*p, tag, "head of {:p}", p);
    assert_eq!(*p.add(size / 2), tag, "middle of {:p}", p);
    assert_eq!(*p.add(size - 1), tag, "tail of {:p}", p);
}

fn sequence() {
    unsafe {
        let a = malloc(2 * MIB);
        let b = malloc(4 * MIB);
        let c = malloc(4 * MIB);
        let d = malloc(8 * MIB);
        for (i, &(p, size)) in [(a, 2 * MIB), (b, 4 * MIB), (c, 4 * MIB), (d, 8 * MIB)]
            .iter()
            .enumerate()
        {
            assert!(!p.is_null());
            fill(p, size, i as u8 + 1);
        }
        free(a);
        free(c);
        free(b);
        let e = malloc(10 * MIB);
        assert!(!e.is_null());
        check(d, 8 * MIB, 4);
        fill(e, 10 * MIB, 9);
        free(e);
        free(d);
    }
    println!("sequence: ok");
}

fn stress() {
    let mut rng = Rng(42);
    let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();
    for i in 0..128u32 {
        let size = (rng.next() as usize % 128 + 1) * 512 * 1024;
        let p = unsafe { malloc(size) };
        assert!(!p.is_null(), "malloc({}) failed", size);
        unsafe { fill(p, size, i as u8) };
        live.push((p, size, i as u8));
        if rng.next() % 10 == 0 {
            let (q, qs, qt) = live.swap_remove(rng.next() as usize % live.len());
            unsafe {
                check(q, qs, qt);
                free(q);
            }
        }
    }
    for (p, size, tag) in live {
        unsafe {
            check(p, size, tag);
            free(p);
        }
    }
    println!("stress: ok");
}

fn calloc_and_realloc() {
    unsafe {
        let p = calloc(4, MIB);
        assert!(!p.is_null());
        assert!(std::slice::from_raw_parts(p, 4 * MIB).iter().all(|&b| b == 0));
        fill(p, 4 * MIB, 0x42);
        let q = realloc(p, 16 * MIB);
        assert!(!q.is_null());
        assert_eq!(*q, 0x42);
        assert_eq!(*q.add(4 * MIB - 1), 0x42);
        free(q);
        assert!(calloc(usize::MAX / 2, 4).is_null(), "calloc overflow must fail");
    }
    println!("calloc/realloc: ok");
}

fn too_huge() {
    let Some(set_mode) = set_mode_fn() else {
        println!("too_huge: skipped (hugepool not preloaded)");
        return;
    };
    unsafe {
        let previous = set_mode(ANON_POOL | NAMED_POOL);
        let p = malloc(16 << 40);
        set_mode(previous);
        assert!(p.is_null(), "16 TiB without fallback must fail");
    }
    println!("too_huge: ok");
}

fn main() {
    sequence();
    stress();
    calloc_and_realloc();
    too_huge();
    println!("\nDone.");
}
