//! The file-backed pool: backing file naming, lifetime and priority over the
//! anonymous pool.

use hugepool::pool::Backing;
use hugepool::{Config, HeapContext, Mode, PageSize, Passthrough, PoolKind};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

const MIB: usize = 1 << 20;

/// A scratch directory removed on drop.
struct TempDir(PathBuf);

impl TempDir {
    fn new(tag: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "hugepool-test-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("create temp dir");
        TempDir(path)
    }

    fn path(&self) -> &Path {
        &self.0
    }

    fn backing_file(&self) -> PathBuf {
        self.0.join(format!("{:010}", std::process::id()))
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn config(dir: &TempDir) -> Config {
    Config::new()
        .with_base_path(dir.path().as_os_str().as_bytes())
        .with_named_pool_size(32 * MIB)
        .with_anon_pool_size(32 * MIB)
        .with_page_size(PageSize::Base)
}

#[test]
fn named_pool_is_preferred() {
    let dir = TempDir::new("preferred");
    let ctx = HeapContext::with_config(config(&dir), Passthrough);
    let p = ctx.alloc(1, 4 * MIB).unwrap();
    assert_eq!(ctx.pool_of(p.as_ptr()), Some(PoolKind::Named));

    let stats = ctx.stats(PoolKind::Named).unwrap();
    assert_eq!(stats.backing, Backing::File);
    assert_eq!(stats.total_size, 32 * MIB);
    assert!(ctx.stats(PoolKind::Anonymous).is_none(), "anon pool untouched");

    unsafe {
        p.as_ptr().write_bytes(0x11, 4 * MIB);
        ctx.free(p.as_ptr());
    }
    assert_eq!(ctx.stats(PoolKind::Named).unwrap().free_blocks, 1);
}

#[test]
fn backing_file_is_unlinked_by_default() {
    let dir = TempDir::new("unlinked");
    let ctx = HeapContext::with_config(config(&dir), Passthrough);
    let p = ctx.alloc(1, 4 * MIB).unwrap();
    assert_eq!(ctx.pool_of(p.as_ptr()), Some(PoolKind::Named));
    assert!(!dir.backing_file().exists());
    unsafe { ctx.free(p.as_ptr()) };
}

#[test]
fn backing_file_kept_on_request() {
    let dir = TempDir::new("kept");
    let ctx = HeapContext::with_config(config(&dir).with_keep_backing_file(true), Passthrough);
    let p = ctx.alloc(1, 4 * MIB).unwrap();
    assert_eq!(ctx.pool_of(p.as_ptr()), Some(PoolKind::Named));

    let file = dir.backing_file();
    let meta = std::fs::metadata(&file).expect("backing file exists");
    assert_eq!(meta.len(), 32 * MIB as u64);

    // Shared mapping: writes reach the file. The first block's payload sits
    // one header span into the file.
    unsafe { p.as_ptr().write_bytes(0x7E, 4096) };
    let contents = std::fs::read(&file).unwrap();
    assert_eq!(&contents[64..64 + 4096], &[0x7E; 4096][..]);

    unsafe { ctx.free(p.as_ptr()) };
    drop(ctx);
}

#[test]
fn named_exhaustion_falls_to_anonymous() {
    let dir = TempDir::new("exhaust");
    let ctx = HeapContext::with_config(config(&dir), Passthrough);
    let a = ctx.alloc(1, 30 * MIB).unwrap();
    let b = ctx.alloc(1, 8 * MIB).unwrap();
    assert_eq!(ctx.pool_of(a.as_ptr()), Some(PoolKind::Named));
    assert_eq!(ctx.pool_of(b.as_ptr()), Some(PoolKind::Anonymous));
    unsafe {
        ctx.free(a.as_ptr());
        ctx.free(b.as_ptr());
    }
}

#[test]
fn named_only_mode() {
    let dir = TempDir::new("only");
    let ctx = HeapContext::with_config(
        config(&dir).with_initial_mode(Mode::NAMED_POOL),
        Passthrough,
    );
    let a = ctx.alloc(1, 16 * MIB).unwrap();
    assert_eq!(ctx.pool_of(a.as_ptr()), Some(PoolKind::Named));
    assert!(ctx.alloc(1, 24 * MIB).is_none());
    unsafe { ctx.free(a.as_ptr()) };
}

#[test]
fn unusable_directory_disables_named_pool() {
    let ctx = HeapContext::with_config(
        Config::new()
            .with_base_path("/nonexistent/hugepool")
            .with_anon_pool_size(32 * MIB)
            .with_page_size(PageSize::Base),
        Passthrough,
    );
    let p = ctx.alloc(1, 4 * MIB).unwrap();
    assert_eq!(ctx.pool_of(p.as_ptr()), Some(PoolKind::Anonymous));
    assert!(ctx.stats(PoolKind::Named).is_none());
    // Never retried.
    let q = ctx.alloc(1, 4 * MIB).unwrap();
    assert_eq!(ctx.pool_of(q.as_ptr()), Some(PoolKind::Anonymous));
    unsafe {
        ctx.free(p.as_ptr());
        ctx.free(q.as_ptr());
    }
}
