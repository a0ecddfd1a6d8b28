//! Out-of-band record of live block offsets, used to catch double frees that
//! the in-band used bit cannot (a block freed, merged away, and freed again).
//!
//! Open addressing with linear probing; slots live in their own anonymous
//! mapping so the table never allocates through the heap it guards.

use crate::platform::{self, PageSize};
use crate::util::{align_up, page_size};
use core::mem::size_of;
use core::ptr;

const INITIAL_CAPACITY: usize = 4096;

pub struct LiveSet {
    /// Stores `offset + 1`; zero marks an empty slot.
    slots: *mut usize,
    capacity: usize,
    count: usize,
    mapped_size: usize,
    /// Set once a mapping fails; every query then answers "live".
    disabled: bool,
}

impl LiveSet {
    pub const fn new() -> Self {
        LiveSet {
            slots: ptr::null_mut(),
            capacity: 0,
            count: 0,
            mapped_size: 0,
            disabled: false,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn insert(&mut self, offset: usize) {
        if self.disabled {
            return;
        }
        if self.count * 4 >= self.capacity * 3 && !self.grow() {
            hp_error!("double-free tracking disabled: cannot grow live set");
            self.disabled = true;
            return;
        }
        unsafe { Self::place(self.slots, self.capacity, offset + 1) };
        self.count += 1;
    }

    /// Forget `offset`. Returns false if it was not live.
    pub fn remove(&mut self, offset: usize) -> bool {
        if self.disabled {
            return true;
        }
        if self.capacity == 0 {
            return false;
        }
        let key = offset + 1;
        let mask = self.capacity - 1;
        let mut idx = hash(key) & mask;
        unsafe {
            loop {
                let current = *self.slots.add(idx);
                if current == 0 {
                    return false;
                }
                if current == key {
                    break;
                }
                idx = (idx + 1) & mask;
            }
            *self.slots.add(idx) = 0;
            self.count -= 1;

            // Backward-shift the rest of the probe run into the hole.
            let mut next = (idx + 1) & mask;
            loop {
                let moved = *self.slots.add(next);
                if moved == 0 {
                    break;
                }
                let ideal = hash(moved) & mask;
                let shift = if next > idx {
                    ideal <= idx || ideal > next
                } else {
                    ideal <= idx && ideal > next
                };
                if shift {
                    *self.slots.add(idx) = moved;
                    *self.slots.add(next) = 0;
                    idx = next;
                }
                next = (next + 1) & mask;
            }
        }
        true
    }

    pub fn contains(&self, offset: usize) -> bool {
        if self.disabled {
            return true;
        }
        if self.capacity == 0 {
            return false;
        }
        let key = offset + 1;
        let mask = self.capacity - 1;
        let mut idx = hash(key) & mask;
        loop {
            let current = unsafe { *self.slots.add(idx) };
            if current == key {
                return true;
            }
            if current == 0 {
                return false;
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Drop every entry and the backing mapping.
    pub fn clear(&mut self) {
        if !self.slots.is_null() {
            unsafe { platform::unmap(self.slots as *mut u8, self.mapped_size) };
        }
        // Reset in place: assigning a fresh set would run Drop on this one.
        self.slots = ptr::null_mut();
        self.capacity = 0;
        self.count = 0;
        self.mapped_size = 0;
        self.disabled = false;
    }

    fn grow(&mut self) -> bool {
        let capacity = if self.capacity == 0 {
            INITIAL_CAPACITY
        } else {
            self.capacity * 2
        };
        let size = align_up(capacity * size_of::<usize>(), page_size());
        let slots = unsafe { platform::map_anonymous(size, PageSize::Base) } as *mut usize;
        if slots.is_null() {
            return false;
        }
        unsafe {
            for i in 0..self.capacity {
                let key = *self.slots.add(i);
                if key != 0 {
                    Self::place(slots, capacity, key);
                }
            }
            if !self.slots.is_null() {
                platform::unmap(self.slots as *mut u8, self.mapped_size);
            }
        }
        self.slots = slots;
        self.capacity = capacity;
        self.mapped_size = size;
        true
    }

    unsafe fn place(slots: *mut usize, capacity: usize, key: usize) {
        let mask = capacity - 1;
        let mut idx = hash(key) & mask;
        loop {
            let slot = &mut *slots.add(idx);
            if *slot == 0 || *slot == key {
                *slot = key;
                return;
            }
            idx = (idx + 1) & mask;
        }
    }
}

impl Drop for LiveSet {
    fn drop(&mut self) {
        self.clear();
    }
}

#[inline]
fn hash(key: usize) -> usize {
    let mut h = key as u64;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h as usize
}
