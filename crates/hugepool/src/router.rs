//! Request routing between the two pools and the fallback allocator.
//!
//! A [`HeapContext`] owns everything one allocator instance needs: its
//! configuration, the mode registry, both pools, and the fallback. The
//! process-wide instance behind the C entry points is just a static
//! `HeapContext` configured from the environment; tests and embedders can
//! build their own with [`HeapContext::with_config`].

use crate::config::Config;
use crate::mode::{Mode, ModeRegistry};
use crate::pool::acquire::acquire;
use crate::pool::{Backing, HeapPool, IntegrityReport, PoolKind, PoolStats};
use crate::sync::Mutex;
use crate::util::{CACHE_LINE, MIN_ALIGN};
use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// The allocator requests go to when no pool serves them.
///
/// Implementations must be usable from inside `malloc`: no allocation
/// through the context that owns them.
pub trait Fallback: Sync {
    /// Null on failure. `align` is a power of two.
    ///
    /// # Safety
    /// Same contract as `posix_memalign`.
    unsafe fn allocate(&self, size: usize, align: usize) -> *mut u8;

    /// # Safety
    /// `ptr` must have come from this fallback and not been released.
    unsafe fn release(&self, ptr: *mut u8);

    /// # Safety
    /// `ptr` must have come from this fallback and not been released.
    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// # Safety
    /// `ptr` must have come from this fallback and not been released.
    unsafe fn usable_size(&self, ptr: *mut u8) -> usize;
}

const UNCONFIGURED: u8 = 0;
const CONFIGURING: u8 = 1;
const CONFIGURED: u8 = 2;

/// A pool plus its published address range. The range is readable without
/// the lock so `free` can classify pointers cheaply.
struct PoolSlot {
    start: AtomicUsize,
    end: AtomicUsize,
    pool: Mutex<HeapPool>,
}

impl PoolSlot {
    const fn new(kind: PoolKind) -> Self {
        PoolSlot {
            start: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            pool: Mutex::new(HeapPool::new(kind)),
        }
    }

    #[inline]
    fn contains(&self, addr: usize) -> bool {
        let start = self.start.load(Ordering::Acquire);
        start != 0 && addr >= start && addr < self.end.load(Ordering::Acquire)
    }

    fn publish(&self, pool: &HeapPool) {
        let start = pool.base() as usize;
        self.end.store(start + pool.total_size(), Ordering::Release);
        self.start.store(start, Ordering::Release);
    }

    fn unpublish(&self) {
        self.start.store(0, Ordering::Release);
        self.end.store(0, Ordering::Release);
    }
}

pub struct HeapContext<F: Fallback> {
    state: AtomicU8,
    config: UnsafeCell<Config>,
    mode: ModeRegistry,
    named: PoolSlot,
    anonymous: PoolSlot,
    fallback: F,
}

// Config is written once, before CONFIGURED is published; pools sit behind
// their locks.
unsafe impl<F: Fallback> Sync for HeapContext<F> {}
unsafe impl<F: Fallback + Send> Send for HeapContext<F> {}

impl<F: Fallback> HeapContext<F> {
    /// A context that reads `HUGEPOOL_*` environment variables on first use.
    pub const fn from_env(fallback: F) -> Self {
        HeapContext {
            state: AtomicU8::new(UNCONFIGURED),
            config: UnsafeCell::new(Config::new()),
            mode: ModeRegistry::new(Mode::ALL),
            named: PoolSlot::new(PoolKind::Named),
            anonymous: PoolSlot::new(PoolKind::Anonymous),
            fallback,
        }
    }

    /// A context with explicit configuration. Pools are still mapped
    /// lazily, by the first request that needs them.
    ///
    /// The log level is process-wide; this sets it to `config.log_level`.
    pub fn with_config(config: Config, fallback: F) -> Self {
        crate::log::set_level(config.log_level);
        HeapContext {
            state: AtomicU8::new(CONFIGURED),
            config: UnsafeCell::new(config),
            mode: ModeRegistry::new(config.initial_mode),
            named: PoolSlot::new(PoolKind::Named),
            anonymous: PoolSlot::new(PoolKind::Anonymous),
            fallback,
        }
    }

    #[inline]
    fn ensure_configured(&self) {
        if self.state.load(Ordering::Acquire) != CONFIGURED {
            self.configure_slow();
        }
    }

    #[cold]
    fn configure_slow(&self) {
        match self.state.compare_exchange(
            UNCONFIGURED,
            CONFIGURING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let config = unsafe { Config::from_env() };
                unsafe { *self.config.get() = config };
                self.mode.set(config.initial_mode);
                self.state.store(CONFIGURED, Ordering::Release);
                hp_debug!("configured: {:?}", config);
            }
            Err(_) => {
                while self.state.load(Ordering::Acquire) != CONFIGURED {
                    core::hint::spin_loop();
                }
            }
        }
    }

    pub fn config(&self) -> &Config {
        self.ensure_configured();
        unsafe { &*self.config.get() }
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    /// Replace the strategy mask, returning the previous one.
    pub fn set_mode(&self, mode: Mode) -> Mode {
        self.ensure_configured();
        let previous = self.mode.set(mode);
        hp_debug!("mode {:?} -> {:?}", previous, mode);
        previous
    }

    pub fn mode(&self) -> Mode {
        self.ensure_configured();
        self.mode.get()
    }

    fn slot(&self, kind: PoolKind) -> &PoolSlot {
        match kind {
            PoolKind::Named => &self.named,
            PoolKind::Anonymous => &self.anonymous,
        }
    }

    /// Allocate `n * elem_size` bytes. The product wraps like the C entry
    /// point it backs; callers wanting overflow checks do them first.
    pub fn alloc(&self, n: usize, elem_size: usize) -> Option<NonNull<u8>> {
        self.alloc_aligned(n.wrapping_mul(elem_size), MIN_ALIGN)
    }

    /// Allocate `size` bytes aligned to `align` (a power of two). Pools only
    /// serve alignments up to a cache line; stricter requests go to the
    /// fallback.
    pub fn alloc_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let config = self.config();
        let mode = self.mode.get();
        if size >= config.alloc_threshold && align <= CACHE_LINE {
            if let Some(ptr) = self.alloc_from_pools(size, mode, config) {
                return Some(ptr);
            }
        }
        if mode.contains(Mode::FALLBACK_ALLOCATOR) {
            let ptr = NonNull::new(unsafe { self.fallback.allocate(size, align.max(MIN_ALIGN)) });
            if ptr.is_none() {
                hp_debug!("fallback refused {} bytes", size);
            }
            return ptr;
        }
        hp_debug!("no strategy in {:?} can serve {} bytes", mode, size);
        None
    }

    fn alloc_from_pools(&self, size: usize, mode: Mode, config: &Config) -> Option<NonNull<u8>> {
        for kind in PoolKind::PRIORITY {
            if !mode.contains(kind.mode_bit()) {
                continue;
            }
            let slot = self.slot(kind);
            let mut pool = slot.pool.lock();
            if !pool.attempted() {
                let requested = match kind {
                    PoolKind::Named => config.named_pool_size,
                    PoolKind::Anonymous => config.anon_pool_size,
                };
                if acquire(&mut pool, requested, config).is_ok() {
                    slot.publish(&pool);
                }
            }
            if !pool.is_ready() {
                continue;
            }
            match pool.allocate(size) {
                Some(ptr) => {
                    hp_debug!("{} pool: {} bytes at {:p}", kind.name(), size, ptr);
                    return Some(ptr);
                }
                None => hp_debug!("{} pool cannot fit {} bytes", kind.name(), size),
            }
        }
        None
    }

    /// Which pool, if any, `ptr` points into.
    pub fn pool_of(&self, ptr: *const u8) -> Option<PoolKind> {
        let addr = ptr as usize;
        PoolKind::PRIORITY
            .into_iter()
            .find(|&kind| self.slot(kind).contains(addr))
    }

    /// Release memory from any strategy. Null is ignored; pointers inside a
    /// pool go back to it, everything else to the fallback.
    ///
    /// # Safety
    /// `ptr` must be null or a live allocation from this context.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(block) = NonNull::new(ptr) else {
            return;
        };
        match self.pool_of(ptr) {
            Some(kind) => {
                self.slot(kind).pool.lock().free(block);
            }
            None => self.fallback.release(ptr),
        }
    }

    /// Resize an allocation, moving it between strategies when needed.
    ///
    /// Pool blocks that already have room are returned unchanged. A
    /// fallback allocation growing past the threshold moves into a pool
    /// when one can take it.
    ///
    /// # Safety
    /// `ptr` must be null or a live allocation from this context. On
    /// success it must not be used again unless it was returned.
    pub unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        let Some(old) = NonNull::new(ptr) else {
            return self.alloc(1, new_size);
        };
        match self.pool_of(ptr) {
            Some(kind) => {
                let usable = self.slot(kind).pool.lock().usable_size(old)?;
                if new_size <= usable {
                    return Some(old);
                }
                let moved = self.alloc(1, new_size)?;
                ptr::copy_nonoverlapping(ptr, moved.as_ptr(), usable);
                self.free(ptr);
                Some(moved)
            }
            None => {
                let config = self.config();
                let mode = self.mode.get();
                // A zero size means the fallback cannot say how much to copy;
                // leave the block with it.
                let old_size = self.fallback.usable_size(ptr);
                if new_size >= config.alloc_threshold && old_size != 0 {
                    if let Some(moved) = self.alloc_from_pools(new_size, mode, config) {
                        ptr::copy_nonoverlapping(ptr, moved.as_ptr(), old_size.min(new_size));
                        self.fallback.release(ptr);
                        return Some(moved);
                    }
                }
                if !mode.contains(Mode::FALLBACK_ALLOCATOR) {
                    return None;
                }
                NonNull::new(self.fallback.reallocate(ptr, new_size))
            }
        }
    }

    /// Usable bytes behind `ptr`; zero for null.
    ///
    /// # Safety
    /// `ptr` must be null or a live allocation from this context.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        let Some(block) = NonNull::new(ptr) else {
            return 0;
        };
        match self.pool_of(ptr) {
            Some(kind) => self.slot(kind).pool.lock().usable_size(block).unwrap_or(0),
            None => self.fallback.usable_size(ptr),
        }
    }

    /// Occupancy of a pool, or `None` if it has no memory.
    pub fn stats(&self, kind: PoolKind) -> Option<PoolStats> {
        let pool = self.slot(kind).pool.lock();
        pool.is_ready().then(|| pool.stats())
    }

    /// Walk a pool's block chain, or `None` if it has no memory.
    pub fn check_integrity(&self, kind: PoolKind) -> Option<IntegrityReport> {
        let pool = self.slot(kind).pool.lock();
        pool.is_ready().then(|| pool.check_integrity())
    }

    /// Restore pool locks and drop the file mapping in a freshly forked
    /// child. Anonymous memory was copied and stays usable.
    ///
    /// # Safety
    /// Only the forking thread may be alive in the process.
    pub unsafe fn after_fork_in_child(&self) {
        for kind in PoolKind::PRIORITY {
            let slot = self.slot(kind);
            slot.pool.force_unlock();
            let pool = slot.pool.data_unlocked();
            if pool.backing() == Backing::File {
                slot.unpublish();
                pool.forget();
            }
        }
    }
}
