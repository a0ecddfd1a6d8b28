//! Fallback to the allocator this crate sits in front of.
//!
//! Built normally, that is simply libc. Built with the `interpose` feature,
//! this library exports `malloc` itself, so calling `libc::malloc` would land
//! back here; the next allocator in link order is found with
//! dlsym(RTLD_NEXT) instead. dlsym may allocate while it works, and those
//! requests are carved from a static scratch arena.

use crate::router::Fallback;
use crate::util::{align_up, MIB, MIN_ALIGN};
use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Size of the arena serving allocations made before the fallback resolves.
pub const SCRATCH_SIZE: usize = MIB;

#[repr(C, align(16))]
struct ScratchBuf<const N: usize>([u8; N]);

/// Lock-free bump allocator over a fixed buffer. Nothing is ever given back:
/// frees of scratch memory are dropped on the floor.
pub struct ScratchArena<const N: usize> {
    buf: UnsafeCell<ScratchBuf<N>>,
    used: AtomicUsize,
}

unsafe impl<const N: usize> Sync for ScratchArena<N> {}

impl<const N: usize> ScratchArena<N> {
    pub const fn new() -> Self {
        ScratchArena {
            buf: UnsafeCell::new(ScratchBuf([0; N])),
            used: AtomicUsize::new(0),
        }
    }

    fn base(&self) -> *mut u8 {
        self.buf.get() as *mut u8
    }

    /// Carve `size` bytes, 16-byte aligned. Null once the arena is full.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        let Some(needed) = size.max(1).checked_add(MIN_ALIGN - 1) else {
            return ptr::null_mut();
        };
        let needed = needed & !(MIN_ALIGN - 1);
        let mut offset = self.used.load(Ordering::Relaxed);
        loop {
            if needed > N - offset {
                return ptr::null_mut();
            }
            match self.used.compare_exchange_weak(
                offset,
                offset + needed,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return unsafe { self.base().add(offset) },
                Err(current) => offset = current,
            }
        }
    }

    /// Like [`alloc`](Self::alloc) with a stricter alignment.
    pub fn alloc_aligned(&self, size: usize, align: usize) -> *mut u8 {
        if align <= MIN_ALIGN {
            return self.alloc(size);
        }
        let Some(padded) = size.checked_add(align - 1) else {
            return ptr::null_mut();
        };
        let raw = self.alloc(padded);
        if raw.is_null() {
            return raw;
        }
        align_up(raw as usize, align) as *mut u8
    }

    /// Whether `ptr` lies in the part of the arena handed out so far.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base() as usize;
        let addr = ptr as usize;
        addr >= base && addr - base < self.used.load(Ordering::Acquire)
    }

    /// Bytes from `ptr` to the end of the carved region; an upper bound on
    /// the size of the allocation at `ptr`.
    pub fn extent_from(&self, ptr: *const u8) -> usize {
        if !self.contains(ptr) {
            return 0;
        }
        self.used.load(Ordering::Acquire) - (ptr as usize - self.base() as usize)
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}

/// Runs a piece of setup once. While it is in flight, including re-entrant
/// calls from inside it, [`run`](Self::run) reports "not ready" instead of
/// waiting.
pub struct SingleFlight {
    claimed: AtomicBool,
    done: AtomicBool,
}

impl SingleFlight {
    pub const fn new() -> Self {
        SingleFlight {
            claimed: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    /// Run `setup` if nobody has claimed it yet. True once setup finished.
    pub fn run(&self, setup: impl FnOnce()) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        if self.claimed.swap(true, Ordering::AcqRel) {
            return self.done.load(Ordering::Acquire);
        }
        setup();
        self.done.store(true, Ordering::Release);
        true
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

#[cfg(feature = "interpose")]
pub static SCRATCH: ScratchArena<SCRATCH_SIZE> = ScratchArena::new();

/// Resolve the next allocator's symbols if that has not happened yet.
/// False while resolution is still in flight; callers should use
/// [`SCRATCH`] meanwhile.
#[cfg(feature = "interpose")]
#[inline]
pub fn ensure_resolved() -> bool {
    real::RESOLVER.run(|| unsafe { real::resolve() })
}

#[cfg(feature = "interpose")]
mod real {
    use super::{SingleFlight, SCRATCH};
    use core::ffi::c_void;
    use core::ptr;
    use core::sync::atomic::{AtomicUsize, Ordering};

    type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
    type FreeFn = unsafe extern "C" fn(*mut c_void);
    type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
    type PosixMemalignFn = unsafe extern "C" fn(*mut *mut c_void, usize, usize) -> libc::c_int;
    type UsableSizeFn = unsafe extern "C" fn(*mut c_void) -> usize;

    pub(super) static RESOLVER: SingleFlight = SingleFlight::new();

    static MALLOC: AtomicUsize = AtomicUsize::new(0);
    static FREE: AtomicUsize = AtomicUsize::new(0);
    static REALLOC: AtomicUsize = AtomicUsize::new(0);
    static POSIX_MEMALIGN: AtomicUsize = AtomicUsize::new(0);
    static USABLE_SIZE: AtomicUsize = AtomicUsize::new(0);

    unsafe fn lookup(slot: &AtomicUsize, name: &[u8]) {
        let sym = libc::dlsym(libc::RTLD_NEXT, name.as_ptr() as *const libc::c_char);
        slot.store(sym as usize, Ordering::Release);
    }

    pub(super) unsafe fn resolve() {
        lookup(&MALLOC, b"malloc\0");
        lookup(&FREE, b"free\0");
        lookup(&REALLOC, b"realloc\0");
        lookup(&POSIX_MEMALIGN, b"posix_memalign\0");
        lookup(&USABLE_SIZE, b"malloc_usable_size\0");
        if MALLOC.load(Ordering::Acquire) == 0 || FREE.load(Ordering::Acquire) == 0 {
            hp_error!("cannot find the next malloc; small requests use scratch memory");
        }
    }

    pub(super) unsafe fn malloc(size: usize) -> *mut u8 {
        match MALLOC.load(Ordering::Acquire) {
            0 => SCRATCH.alloc(size),
            f => {
                let func: MallocFn = core::mem::transmute(f);
                func(size) as *mut u8
            }
        }
    }

    pub(super) unsafe fn memalign(align: usize, size: usize) -> *mut u8 {
        match POSIX_MEMALIGN.load(Ordering::Acquire) {
            0 => SCRATCH.alloc_aligned(size, align),
            f => {
                let func: PosixMemalignFn = core::mem::transmute(f);
                let mut out: *mut c_void = ptr::null_mut();
                if func(&mut out, align, size) == 0 {
                    out as *mut u8
                } else {
                    ptr::null_mut()
                }
            }
        }
    }

    pub(super) unsafe fn free(ptr: *mut u8) {
        if SCRATCH.contains(ptr) {
            return;
        }
        let f = FREE.load(Ordering::Acquire);
        if f != 0 {
            let func: FreeFn = core::mem::transmute(f);
            func(ptr as *mut c_void);
        }
    }

    pub(super) unsafe fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
        let f = REALLOC.load(Ordering::Acquire);
        if SCRATCH.contains(ptr) || f == 0 {
            let moved = malloc(size);
            if !moved.is_null() {
                ptr::copy_nonoverlapping(ptr, moved, size.min(SCRATCH.extent_from(ptr)));
            }
            return moved;
        }
        let func: ReallocFn = core::mem::transmute(f);
        func(ptr as *mut c_void, size) as *mut u8
    }

    pub(super) unsafe fn usable_size(ptr: *mut u8) -> usize {
        if SCRATCH.contains(ptr) {
            return SCRATCH.extent_from(ptr);
        }
        match USABLE_SIZE.load(Ordering::Acquire) {
            0 => 0,
            f => {
                let func: UsableSizeFn = core::mem::transmute(f);
                func(ptr as *mut c_void)
            }
        }
    }
}

#[cfg(not(feature = "interpose"))]
mod real {
    use core::ffi::c_void;
    use core::ptr;

    pub(super) unsafe fn malloc(size: usize) -> *mut u8 {
        libc::malloc(size) as *mut u8
    }

    pub(super) unsafe fn memalign(align: usize, size: usize) -> *mut u8 {
        let mut out: *mut c_void = ptr::null_mut();
        if libc::posix_memalign(&mut out, align, size) == 0 {
            out as *mut u8
        } else {
            ptr::null_mut()
        }
    }

    pub(super) unsafe fn free(ptr: *mut u8) {
        libc::free(ptr as *mut c_void);
    }

    pub(super) unsafe fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
        libc::realloc(ptr as *mut c_void, size) as *mut u8
    }

    #[cfg(target_os = "linux")]
    pub(super) unsafe fn usable_size(ptr: *mut u8) -> usize {
        libc::malloc_usable_size(ptr as *mut c_void)
    }

    #[cfg(target_os = "macos")]
    pub(super) unsafe fn usable_size(ptr: *mut u8) -> usize {
        libc::malloc_size(ptr as *const c_void)
    }
}

/// [`Fallback`] that hands requests to the displaced system allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Fallback for Passthrough {
    #[inline]
    unsafe fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        if align <= MIN_ALIGN {
            real::malloc(size)
        } else {
            real::memalign(align, size)
        }
    }

    #[inline]
    unsafe fn release(&self, ptr: *mut u8) {
        real::free(ptr);
    }

    #[inline]
    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        real::realloc(ptr, size)
    }

    #[inline]
    unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        real::usable_size(ptr)
    }
}
