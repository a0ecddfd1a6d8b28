//! Keeping the global context usable in a fork() child.
//!
//! A pool lock may have been held by a thread that does not exist in the
//! child, and the named pool's mapping is not inherited (it is advised
//! `MADV_DONTFORK`). The child handler releases the locks and forgets the
//! named mapping; the anonymous pool is copied with the rest of memory.

use core::sync::atomic::{AtomicBool, Ordering};

static REGISTERED: AtomicBool = AtomicBool::new(false);

/// # Safety
/// Called by the C runtime in the child, where only the forking thread
/// exists.
unsafe extern "C" fn atfork_child() {
    crate::init::context().after_fork_in_child();
}

/// Install the child handler the first time this is called.
pub fn register_once() {
    if REGISTERED.load(Ordering::Relaxed) || REGISTERED.swap(true, Ordering::AcqRel) {
        return;
    }
    unsafe {
        libc::pthread_atfork(None, None, Some(atfork_child));
    }
}
