use crate::init;
use crate::mode::Mode;
use core::ffi::c_void;
use core::ptr::{self, NonNull};

#[inline]
fn into_raw(ptr: Option<NonNull<u8>>) -> *mut c_void {
    ptr.map_or(ptr::null_mut(), |p| p.as_ptr() as *mut c_void)
}

// ============================================================================
// Explicit API (always exported)
// ============================================================================

/// Allocate `n * elem_size` bytes. Null when no enabled strategy can serve
/// the request.
#[no_mangle]
pub extern "C" fn hugepool_alloc(n: usize, elem_size: usize) -> *mut c_void {
    into_raw(init::alloc(n, elem_size))
}

/// # Safety
/// `ptr` must be null or come from `hugepool_alloc` (or the interposed
/// malloc family) and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn hugepool_free(ptr: *mut c_void) {
    init::free(ptr as *mut u8);
}

/// Replace the strategy mask; returns the previous one. Unknown bits are
/// dropped.
#[no_mangle]
pub extern "C" fn hugepool_set_mode(mode: u32) -> u32 {
    init::set_mode(Mode::from_bits_truncate(mode)).bits()
}

#[no_mangle]
pub extern "C" fn hugepool_get_mode() -> u32 {
    init::mode().bits()
}

// ============================================================================
// Standard C allocator API (feature "interpose")
// ============================================================================

#[cfg(feature = "interpose")]
pub use interposed::*;

#[cfg(feature = "interpose")]
mod interposed {
    use super::into_raw;
    use crate::allocator::passthrough::{ensure_resolved, SCRATCH};
    use crate::init;
    use crate::platform;
    use crate::util::MIN_ALIGN;
    use core::ffi::c_void;
    use core::ptr;

    #[inline]
    fn or_enomem(ptr: *mut c_void) -> *mut c_void {
        if ptr.is_null() {
            platform::set_errno(libc::ENOMEM);
        }
        ptr
    }

    #[no_mangle]
    pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
        if !ensure_resolved() {
            return or_enomem(SCRATCH.alloc(size) as *mut c_void);
        }
        or_enomem(into_raw(init::context().alloc(1, size)))
    }

    #[no_mangle]
    pub unsafe extern "C" fn free(ptr: *mut c_void) {
        if ptr.is_null() || SCRATCH.contains(ptr as *const u8) {
            return;
        }
        init::context().free(ptr as *mut u8);
    }

    #[no_mangle]
    pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
        let Some(total) = nmemb.checked_mul(size) else {
            platform::set_errno(libc::ENOMEM);
            return ptr::null_mut();
        };
        if !ensure_resolved() {
            // Scratch memory is never reused, so it is still zero.
            return or_enomem(SCRATCH.alloc(total) as *mut c_void);
        }
        let ptr = into_raw(init::context().alloc(1, total));
        if !ptr.is_null() {
            ptr::write_bytes(ptr as *mut u8, 0, total);
        }
        or_enomem(ptr)
    }

    #[no_mangle]
    pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
        let old = ptr as *mut u8;
        if SCRATCH.contains(old) {
            let moved = malloc(size);
            if !moved.is_null() {
                let len = size.min(SCRATCH.extent_from(old));
                ptr::copy_nonoverlapping(old, moved as *mut u8, len);
            }
            return moved;
        }
        if !ensure_resolved() {
            return or_enomem(SCRATCH.alloc(size) as *mut c_void);
        }
        or_enomem(into_raw(init::context().realloc(old, size)))
    }

    unsafe fn aligned(alignment: usize, size: usize) -> *mut c_void {
        if !ensure_resolved() {
            return SCRATCH.alloc_aligned(size, alignment) as *mut c_void;
        }
        into_raw(init::context().alloc_aligned(size, alignment.max(MIN_ALIGN)))
    }

    #[no_mangle]
    pub unsafe extern "C" fn posix_memalign(
        memptr: *mut *mut c_void,
        alignment: usize,
        size: usize,
    ) -> libc::c_int {
        if memptr.is_null()
            || !alignment.is_power_of_two()
            || alignment < core::mem::size_of::<*mut c_void>()
        {
            return libc::EINVAL;
        }
        let ptr = aligned(alignment, size);
        if ptr.is_null() {
            return libc::ENOMEM;
        }
        *memptr = ptr;
        0
    }

    #[no_mangle]
    pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
        // The size need not be a multiple of the alignment.
        if !alignment.is_power_of_two() {
            platform::set_errno(libc::EINVAL);
            return ptr::null_mut();
        }
        or_enomem(aligned(alignment, size))
    }

    #[no_mangle]
    pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
        if !alignment.is_power_of_two() {
            platform::set_errno(libc::EINVAL);
            return ptr::null_mut();
        }
        or_enomem(aligned(alignment, size))
    }

    #[no_mangle]
    pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
        let ptr = ptr as *mut u8;
        if SCRATCH.contains(ptr) {
            return SCRATCH.extent_from(ptr);
        }
        init::context().usable_size(ptr)
    }
}
