#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub use macos as sys;

use crate::util::{GIB, MIB};
use core::ffi::CStr;

/// Page sizes tried when mapping an anonymous pool, largest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// 1 GiB hugetlb pages.
    Giant,
    /// 2 MiB hugetlb pages.
    Huge,
    /// Ordinary pages, advised for transparent huge pages.
    Base,
}

impl PageSize {
    pub const CASCADE: [PageSize; 3] = [PageSize::Giant, PageSize::Huge, PageSize::Base];

    pub fn bytes(self) -> usize {
        match self {
            PageSize::Giant => GIB,
            PageSize::Huge => 2 * MIB,
            PageSize::Base => crate::util::page_size(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PageSize::Giant => "1G",
            PageSize::Huge => "2M",
            PageSize::Base => "base",
        }
    }
}

/// Map `size` bytes of private anonymous memory backed by `page` pages.
/// Returns null on failure; `errno` tells why.
///
/// # Safety
/// `size` must be a non-zero multiple of `page.bytes()`.
#[inline]
pub unsafe fn map_anonymous(size: usize, page: PageSize) -> *mut u8 {
    sys::map_anonymous(size, page)
}

/// Map `size` bytes of `fd` shared, from offset zero. Null on failure.
///
/// # Safety
/// `fd` must be open read-write and at least `size` bytes long.
#[inline]
pub unsafe fn map_shared(fd: libc::c_int, size: usize) -> *mut u8 {
    sys::map_shared(fd, size)
}

/// # Safety
/// `ptr`/`size` must describe a mapping this crate created.
#[inline]
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    sys::unmap(ptr, size);
}

/// Ask for transparent huge pages on a region. Best effort.
///
/// # Safety
/// `ptr`/`size` must describe a live mapping.
#[inline]
pub unsafe fn advise_huge(ptr: *mut u8, size: usize) {
    sys::advise_huge(ptr, size);
}

/// Keep a region out of fork() children. Best effort.
///
/// # Safety
/// `ptr`/`size` must describe a live mapping.
#[inline]
pub unsafe fn advise_dont_fork(ptr: *mut u8, size: usize) {
    sys::advise_dont_fork(ptr, size);
}

/// Create (or truncate) a backing file. Returns the descriptor or errno.
pub fn create_file(path: &CStr) -> Result<libc::c_int, i32> {
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC | libc::O_CLOEXEC,
            0o600 as libc::c_uint,
        )
    };
    if fd < 0 {
        Err(errno())
    } else {
        Ok(fd)
    }
}

/// Reserve `size` bytes of real storage for `fd`.
pub fn reserve_file(fd: libc::c_int, size: usize) -> Result<(), i32> {
    sys::reserve_file(fd, size)
}

pub fn close(fd: libc::c_int) {
    unsafe {
        libc::close(fd);
    }
}

pub fn unlink(path: &CStr) {
    unsafe {
        libc::unlink(path.as_ptr());
    }
}

pub fn process_id() -> u32 {
    unsafe { libc::getpid() as u32 }
}

pub fn errno() -> i32 {
    sys::errno()
}

pub fn set_errno(value: i32) {
    sys::set_errno(value);
}
