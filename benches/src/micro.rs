//! Microbenchmarks for hugepool.
//!
//! Compares large-block alloc/free through a pool against the system
//! allocator, plus first-touch cost (where huge pages pay off). Plain
//! binary; run with `cargo run --release -p hugepool-benches`.

use hugepool::{Config, HeapContext, Mode, Passthrough, PoolKind};
use std::hint::black_box;
use std::time::Instant;

const MIB: usize = 1 << 20;

fn context() -> HeapContext<Passthrough> {
    // Environment first (HUGEPOOL_PAGE_SIZE etc.), then bench sizes.
    let config = unsafe { Config::from_env() }.with_anon_pool_size(2048 * MIB);
    HeapContext::with_config(config, Passthrough)
}

/// Measure alloc/free latency for a given size, N iterations.
fn bench_alloc_free(ctx: &HeapContext<Passthrough>, size: usize, iterations: usize) -> f64 {
    for _ in 0..100 {
        if let Some(p) = ctx.alloc(1, black_box(size)) {
            unsafe { ctx.free(black_box(p.as_ptr())) };
        }
    }
    let start = Instant::now();
    for _ in 0..iterations {
        if let Some(p) = ctx.alloc(1, black_box(size)) {
            unsafe {
                std::ptr::write_bytes(p.as_ptr(), 0xAB, 64);
                ctx.free(black_box(p.as_ptr()));
            }
        }
    }
    start.elapsed().as_nanos() as f64 / iterations as f64
}

/// Allocate `count` live blocks, then free them in an interleaved order so
/// every free has a merge to do.
fn bench_fragmenting(ctx: &HeapContext<Passthrough>, size: usize, count: usize) -> f64 {
    let start = Instant::now();
    let ptrs: Vec<_> = (0..count).filter_map(|_| ctx.alloc(1, black_box(size))).collect();
    for p in ptrs.iter().step_by(2).chain(ptrs.iter().skip(1).step_by(2)) {
        unsafe { ctx.free(black_box(p.as_ptr())) };
    }
    start.elapsed().as_nanos() as f64 / (2 * count) as f64
}

/// Write every byte of a fresh block: page-fault cost per MiB.
fn bench_first_touch(ctx: &HeapContext<Passthrough>, size: usize) -> f64 {
    let Some(p) = ctx.alloc(1, size) else {
        return f64::NAN;
    };
    let start = Instant::now();
    unsafe { std::ptr::write_bytes(p.as_ptr(), 0x5A, size) };
    let ns = start.elapsed().as_nanos() as f64 / (size / MIB) as f64;
    unsafe { ctx.free(p.as_ptr()) };
    ns
}

fn main() {
    let iterations = 100_000;
    let ctx = context();

    for (label, mode) in [
        ("pool", Mode::ANON_POOL | Mode::NAMED_POOL),
        ("system", Mode::FALLBACK_ALLOCATOR),
    ] {
        ctx.set_mode(mode);
        println!("=== {} ===", label);

        println!("--- alloc/free latency (ns/op) ---");
        for &size in &[2 * MIB, 4 * MIB, 16 * MIB, 64 * MIB] {
            let ns = bench_alloc_free(&ctx, size, iterations);
            println!("  size={:>4} MiB: {:>8.1} ns", size / MIB, ns);
        }

        println!("--- interleaved free of 256 x 4 MiB (ns/op) ---");
        println!("  {:.1} ns", bench_fragmenting(&ctx, 4 * MIB, 256));

        println!("--- first touch of 512 MiB (ns/MiB) ---");
        println!("  {:.1} ns", bench_first_touch(&ctx, 512 * MIB));
        println!();
    }

    if let Some(stats) = ctx.stats(PoolKind::Anonymous) {
        println!("anonymous pool: {:?}", stats);
    }
}
