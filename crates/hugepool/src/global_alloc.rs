//! `#[global_allocator]` support.
//!
//! ```rust,ignore
//! use hugepool::HugePool;
//!
//! #[global_allocator]
//! static GLOBAL: HugePool = HugePool;
//! ```
//!
//! Large Rust allocations (vectors, buffers) land in the huge-page pools;
//! everything else goes to the system allocator.

use crate::init;
use crate::util::MIN_ALIGN;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

/// Zero-sized handle implementing [`GlobalAlloc`] over the process-global
/// context.
pub struct HugePool;

unsafe impl GlobalAlloc for HugePool {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // Zero-size types: a well-aligned dangling pointer.
        if layout.size() == 0 {
            return layout.align() as *mut u8;
        }
        init::context()
            .alloc_aligned(layout.size(), layout.align())
            .map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.alloc(layout);
        if !ptr.is_null() && layout.size() != 0 {
            ptr::write_bytes(ptr, 0, layout.size());
        }
        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        init::context().free(ptr);
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let old_size = layout.size();
        let align = layout.align();

        if old_size == 0 {
            return self.alloc(Layout::from_size_align_unchecked(new_size, align));
        }

        if align <= MIN_ALIGN {
            return init::context()
                .realloc(ptr, new_size)
                .map_or(ptr::null_mut(), |p| p.as_ptr());
        }

        // The router's realloc only promises MIN_ALIGN; move by hand.
        let moved = self.alloc(Layout::from_size_align_unchecked(new_size, align));
        if !moved.is_null() {
            ptr::copy_nonoverlapping(ptr, moved, old_size.min(new_size));
            init::context().free(ptr);
        }
        moved
    }
}
