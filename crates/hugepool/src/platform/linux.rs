use super::PageSize;
use core::ptr;

// Huge page size selectors from mmap(2); spelled out so older libc builds work.
const MAP_HUGE_SHIFT: libc::c_int = 26;
const MAP_HUGE_2MB: libc::c_int = 21 << MAP_HUGE_SHIFT;
const MAP_HUGE_1GB: libc::c_int = 30 << MAP_HUGE_SHIFT;

fn anonymous_flags(page: PageSize) -> libc::c_int {
    let base = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    match page {
        // No MAP_NORESERVE here: a hugetlb mapping must fail up front when
        // the pages are not reserved, otherwise the cascade never advances
        // and the first touch faults with SIGBUS instead.
        PageSize::Giant => base | libc::MAP_HUGETLB | MAP_HUGE_1GB,
        PageSize::Huge => base | libc::MAP_HUGETLB | MAP_HUGE_2MB,
        PageSize::Base => base | libc::MAP_NORESERVE,
    }
}

/// # Safety
/// `size` must be a non-zero multiple of `page.bytes()`.
pub unsafe fn map_anonymous(size: usize, page: PageSize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        anonymous_flags(page),
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        return ptr::null_mut();
    }
    if page == PageSize::Base {
        advise_huge(result as *mut u8, size);
    }
    result as *mut u8
}

/// # Safety
/// `fd` must be open read-write and cover `size` bytes.
pub unsafe fn map_shared(fd: libc::c_int, size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED,
        fd,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// # Safety
/// `ptr` must have been returned by one of the map functions with the same `size`.
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

/// # Safety
/// Region must be a live mapping.
pub unsafe fn advise_huge(ptr: *mut u8, size: usize) {
    // EINVAL without THP support is fine; the mapping still works.
    libc::madvise(ptr as *mut libc::c_void, size, libc::MADV_HUGEPAGE);
}

/// # Safety
/// Region must be a live mapping.
pub unsafe fn advise_dont_fork(ptr: *mut u8, size: usize) {
    libc::madvise(ptr as *mut libc::c_void, size, libc::MADV_DONTFORK);
}

pub fn reserve_file(fd: libc::c_int, size: usize) -> Result<(), i32> {
    // posix_fallocate reports the error number directly, not via errno.
    match unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) } {
        0 => Ok(()),
        err => Err(err),
    }
}

pub fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

pub fn set_errno(value: i32) {
    unsafe { *libc::__errno_location() = value };
}
