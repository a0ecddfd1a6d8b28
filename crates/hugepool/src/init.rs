//! The process-wide allocator instance behind the C entry points and
//! [`HugePool`](crate::HugePool).

use crate::allocator::Passthrough;
use crate::fork;
use crate::mode::Mode;
use crate::router::HeapContext;
use core::ptr::NonNull;

pub type GlobalContext = HeapContext<Passthrough>;

static CONTEXT: GlobalContext = HeapContext::from_env(Passthrough);

/// Library constructor, run before main() when loaded as a shared object.
#[used]
#[cfg_attr(target_os = "linux", link_section = ".init_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_init_func")]
static CTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn init() {
        #[cfg(feature = "interpose")]
        crate::allocator::passthrough::ensure_resolved();
        fork::register_once();
    }
    init
};

/// The global context. Configuration is read from the environment the first
/// time anything asks for it.
#[inline(always)]
pub fn context() -> &'static GlobalContext {
    &CONTEXT
}

/// Allocate `n * elem_size` bytes from the global context.
pub fn alloc(n: usize, elem_size: usize) -> Option<NonNull<u8>> {
    fork::register_once();
    CONTEXT.alloc(n, elem_size)
}

/// Release memory from [`alloc`]. Null is ignored.
///
/// # Safety
/// `ptr` must be null or a live allocation from the global context.
pub unsafe fn free(ptr: *mut u8) {
    CONTEXT.free(ptr);
}

/// Replace the global strategy mask, returning the previous one.
pub fn set_mode(mode: Mode) -> Mode {
    CONTEXT.set_mode(mode)
}

pub fn mode() -> Mode {
    CONTEXT.mode()
}
