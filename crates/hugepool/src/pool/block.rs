//! First-fit allocation over a pool's block chain.
//!
//! Blocks are carved front to back starting at the pool's cursor. A free
//! block that fits is split when the leftover would exceed the pool's split
//! threshold; otherwise the whole block is handed out. Freeing merges with
//! free neighbours on both sides, so two adjacent free blocks never exist.

use super::header::{block_size_for, BlockHeader, HEADER_SPAN};
use super::heap::HeapPool;
use crate::util::{is_aligned, CACHE_LINE};
use core::ptr::{self, NonNull};

impl HeapPool {
    /// Reserve a block with at least `size` usable bytes. The returned
    /// pointer is cache-line aligned. `None` when no free block is big
    /// enough or the pool is not mapped.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if !self.is_ready() {
            return None;
        }
        let needed = block_size_for(size)?;
        if needed > self.total_size {
            return None;
        }

        let mut offset = self.cursor;
        let mut prefix_used = true;
        while offset < self.total_size {
            let header = unsafe { &*self.header(offset) };
            let block_size = header.size();
            if block_size == 0 {
                hp_error!(
                    "{} pool: zero-sized block at offset {:#x}, giving up",
                    self.kind.name(),
                    offset
                );
                return None;
            }
            if !header.is_used() {
                if block_size >= needed {
                    return Some(unsafe { self.carve(offset, needed) });
                }
                prefix_used = false;
            } else if prefix_used {
                // Nothing free behind us yet; the next search can start later.
                self.cursor = offset + block_size;
            }
            offset += block_size;
        }
        None
    }

    /// Mark the free block at `offset` used, splitting off the tail when it
    /// is worth keeping.
    unsafe fn carve(&mut self, offset: usize, needed: usize) -> NonNull<u8> {
        let header = &mut *self.header(offset);
        let block_size = header.size();
        let next = offset + block_size;
        let remainder = block_size - needed;

        if remainder > self.split_threshold && remainder >= HEADER_SPAN {
            header.set_size(needed);
            let tail = offset + needed;
            ptr::write(self.header(tail), BlockHeader::free(remainder, Some(offset)));
            if next < self.total_size {
                (*self.header(next)).set_prev(Some(tail));
            }
            if self.cursor == offset {
                self.cursor = tail;
            }
        } else if self.cursor == offset {
            self.cursor = next;
        }
        header.set_used(true);

        #[cfg(feature = "double-free-check")]
        self.live.insert(offset);

        NonNull::new_unchecked(self.base.add(offset + HEADER_SPAN))
    }

    /// Header offset for a payload pointer, if it could have come from
    /// [`allocate`](Self::allocate).
    fn block_offset(&self, ptr: NonNull<u8>) -> Option<usize> {
        if !self.contains(ptr.as_ptr()) {
            return None;
        }
        let payload = ptr.as_ptr() as usize - self.base as usize;
        if payload < HEADER_SPAN || !is_aligned(payload, CACHE_LINE) {
            return None;
        }
        Some(payload - HEADER_SPAN)
    }

    /// Return a block to the pool and merge it with free neighbours.
    ///
    /// Pointers that are not a live block of this pool are reported and
    /// ignored; the return value says whether the block was released.
    ///
    /// # Safety
    /// If `ptr` is a live block of this pool, the caller must not use it
    /// afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> bool {
        let Some(offset) = self.block_offset(ptr) else {
            hp_error!(
                "{} pool: free of {:p}, not a block address",
                self.kind.name(),
                ptr
            );
            return false;
        };

        #[cfg(feature = "double-free-check")]
        if !self.live.remove(offset) {
            hp_error!("{} pool: double free of {:p}", self.kind.name(), ptr);
            return false;
        }

        let header = &mut *self.header(offset);
        if !header.is_used() {
            hp_error!(
                "{} pool: free of {:p}, block is not in use",
                self.kind.name(),
                ptr
            );
            return false;
        }
        header.set_used(false);
        if offset < self.cursor {
            self.cursor = offset;
        }

        let mut start = offset;
        let mut size = header.size();

        let next = offset + size;
        if next < self.total_size {
            let following = &*self.header(next);
            if !following.is_used() {
                size += following.size();
                header.set_size(size);
            }
        }

        if let Some(prev) = header.prev() {
            let preceding = &mut *self.header(prev);
            if !preceding.is_used() {
                size += preceding.size();
                preceding.set_size(size);
                start = prev;
            }
        }

        let end = start + size;
        if end < self.total_size {
            (*self.header(end)).set_prev(Some(start));
        }
        if self.cursor > start && self.cursor < end {
            self.cursor = start;
        }
        true
    }

    /// Usable bytes behind a live block's payload pointer.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = self.block_offset(ptr)?;
        let header = unsafe { &*self.header(offset) };
        if header.is_used() {
            Some(header.size() - HEADER_SPAN)
        } else {
            None
        }
    }
}
