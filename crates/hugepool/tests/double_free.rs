//! Pooled traffic with the live-block table enabled.
#![cfg(feature = "double-free-check")]

use hugepool::{Config, HeapContext, PageSize, Passthrough, PoolKind};

const MIB: usize = 1 << 20;

fn context() -> HeapContext<Passthrough> {
    let config = Config::new()
        .with_anon_pool_size(16 * MIB)
        .with_page_size(PageSize::Base)
        .with_split_threshold(0);
    HeapContext::with_config(config, Passthrough)
}

#[test]
fn pooled_alloc_free_and_drop() {
    let ctx = context();
    let p = ctx.alloc(1, 4 * MIB).unwrap();
    assert_eq!(ctx.pool_of(p.as_ptr()), Some(PoolKind::Anonymous));
    unsafe {
        p.as_ptr().write_bytes(0x5C, 4 * MIB);
        ctx.free(p.as_ptr());
    }
    let stats = ctx.stats(PoolKind::Anonymous).unwrap();
    assert_eq!(stats.blocks, 1);
    drop(ctx);

    // A second context maps and formats its own pool.
    let ctx = context();
    let q = ctx.alloc(1, 4 * MIB).unwrap();
    unsafe { ctx.free(q.as_ptr()) };
}

#[test]
fn repeated_free_leaves_the_pool_alone() {
    let ctx = context();
    let a = ctx.alloc(1, 2 * MIB).unwrap();
    let b = ctx.alloc(1, 2 * MIB).unwrap();
    let c = ctx.alloc(1, 2 * MIB).unwrap();
    unsafe {
        ctx.free(a.as_ptr());
        ctx.free(b.as_ptr());
        let merged = ctx.stats(PoolKind::Anonymous).unwrap();

        // b's header is now inside the merged block.
        ctx.free(b.as_ptr());
        ctx.free(a.as_ptr());
        let after = ctx.stats(PoolKind::Anonymous).unwrap();
        assert_eq!(after.blocks, merged.blocks);
        assert_eq!(after.used_bytes, merged.used_bytes);
        assert!(ctx.check_integrity(PoolKind::Anonymous).unwrap().is_ok());

        ctx.free(c.as_ptr());
    }
    assert_eq!(ctx.stats(PoolKind::Anonymous).unwrap().blocks, 1);
}
