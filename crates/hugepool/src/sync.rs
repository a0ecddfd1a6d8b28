use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicI32, Ordering};

const UNLOCKED: i32 = 0;
const LOCKED: i32 = 1;
const CONTENDED: i32 = 2;

/// Futex-backed lock word. std::sync::Mutex is off limits: anything that can
/// allocate may re-enter us when we stand in for malloc.
pub struct RawMutex {
    state: AtomicI32,
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    pub const fn new() -> Self {
        Self {
            state: AtomicI32::new(UNLOCKED),
        }
    }

    #[inline]
    pub fn lock(&self) {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_contended();
    }

    #[cold]
    fn lock_contended(&self) {
        // Brief spin first; pool operations are short.
        for _ in 0..64 {
            if self.state.load(Ordering::Relaxed) == UNLOCKED
                && self
                    .state
                    .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            core::hint::spin_loop();
        }
        while self.state.swap(CONTENDED, Ordering::Acquire) != UNLOCKED {
            wait(&self.state, CONTENDED);
        }
    }

    #[inline]
    pub fn unlock(&self) {
        if self.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
            wake_one(&self.state);
        }
    }

    /// Drop the lock regardless of owner.
    ///
    /// # Safety
    /// Only sound when no other thread can hold the lock, i.e. in the child
    /// right after fork().
    pub unsafe fn force_unlock(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }
}

#[cfg(target_os = "linux")]
fn wait(state: &AtomicI32, expected: i32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            state as *const AtomicI32,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            core::ptr::null::<libc::timespec>(),
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn wait(_state: &AtomicI32, _expected: i32) {
    unsafe {
        libc::sched_yield();
    }
}

#[cfg(target_os = "linux")]
fn wake_one(state: &AtomicI32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            state as *const AtomicI32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            1i32,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn wake_one(_state: &AtomicI32) {}

/// Allocation-free mutex around a value, guarding one heap pool.
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// See [`RawMutex::force_unlock`].
    pub unsafe fn force_unlock(&self) {
        self.raw.force_unlock();
    }

    /// Access the value without taking the lock.
    ///
    /// # Safety
    /// The caller must be the only thread alive (post-fork child).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_unlocked(&self) -> &mut T {
        &mut *self.data.get()
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> core::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> core::ops::DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}
