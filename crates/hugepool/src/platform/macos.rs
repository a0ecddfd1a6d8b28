use super::PageSize;
use core::ptr;

pub unsafe fn map_anonymous(size: usize, page: PageSize) -> *mut u8 {
    // No hugetlb on macOS; only the base tier can succeed.
    if page != PageSize::Base {
        return ptr::null_mut();
    }
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

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

pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

pub unsafe fn advise_huge(_ptr: *mut u8, _size: usize) {}

pub unsafe fn advise_dont_fork(ptr: *mut u8, size: usize) {
    libc::minherit(ptr as *mut libc::c_void, size, libc::VM_INHERIT_NONE);
}

pub fn reserve_file(fd: libc::c_int, size: usize) -> Result<(), i32> {
    if unsafe { libc::ftruncate(fd, size as libc::off_t) } == 0 {
        Ok(())
    } else {
        Err(errno())
    }
}

pub fn errno() -> i32 {
    unsafe { *libc::__error() }
}

pub fn set_errno(value: i32) {
    unsafe { *libc::__error() = value };
}
