//! A pool: one contiguous mapping tiled by block headers.
//!
//! Offsets, not addresses, link the blocks, so the chain stays valid for any
//! base. The pool owns its mapping and unmaps it on drop unless the memory
//! was borrowed.

use super::header::{BlockHeader, HEADER_SPAN};
use super::PoolKind;
use crate::platform::{self, PageSize};
use crate::util::{round_down, CACHE_LINE, MIN_HUGE_PAGE};
use core::ptr::{self, NonNull};

/// Where a pool's memory came from, which decides how it is given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// No memory yet, or initialization failed.
    Unmapped,
    /// Private anonymous mapping using the given page tier.
    Anonymous(PageSize),
    /// Shared mapping of the per-process backing file.
    File,
    /// Caller-provided region; never unmapped by the pool.
    Borrowed,
}

/// One contiguous region managed as a chain of [`BlockHeader`]s.
///
/// A pool starts unmapped. The first allocation that needs it asks
/// [`acquire`](super::acquire::acquire) for memory exactly once; after that
/// it is either ready for the rest of its life or permanently unusable.
pub struct HeapPool {
    pub(super) kind: PoolKind,
    pub(super) base: *mut u8,
    pub(super) total_size: usize,
    /// Offset of the first block the next search looks at. Every block
    /// before it is in use.
    pub(super) cursor: usize,
    pub(super) split_threshold: usize,
    pub(super) backing: Backing,
    pub(super) attempted: bool,
    #[cfg(feature = "double-free-check")]
    pub(super) live: super::shadow::LiveSet,
}

// The region is only touched under the owning lock.
unsafe impl Send for HeapPool {}

impl HeapPool {
    pub const fn new(kind: PoolKind) -> Self {
        HeapPool {
            kind,
            base: ptr::null_mut(),
            total_size: 0,
            cursor: 0,
            split_threshold: MIN_HUGE_PAGE,
            backing: Backing::Unmapped,
            attempted: false,
            #[cfg(feature = "double-free-check")]
            live: super::shadow::LiveSet::new(),
        }
    }

    /// Manage an existing region as a pool. `len` is rounded down to a
    /// cache-line multiple; the region is never unmapped by the pool.
    ///
    /// # Safety
    /// `base` must be cache-line aligned, valid for reads and writes of `len`
    /// bytes, and outlive the pool.
    pub unsafe fn from_region(
        kind: PoolKind,
        base: NonNull<u8>,
        len: usize,
        split_threshold: usize,
    ) -> Self {
        let mut pool = HeapPool::new(kind);
        pool.attempted = true;
        let len = round_down(len, CACHE_LINE);
        if len >= HEADER_SPAN {
            pool.install(base.as_ptr(), len, Backing::Borrowed, split_threshold);
        }
        pool
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn base(&self) -> *mut u8 {
        self.base
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }

    pub fn split_threshold(&self) -> usize {
        self.split_threshold
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether memory has been mapped and formatted.
    #[inline]
    pub fn is_ready(&self) -> bool {
        !self.base.is_null()
    }

    /// Whether initialization has been tried, successful or not.
    #[inline]
    pub fn attempted(&self) -> bool {
        self.attempted
    }

    pub(crate) fn mark_attempted(&mut self) {
        self.attempted = true;
    }

    /// Whether `ptr` falls inside this pool's region.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let base = self.base as usize;
        self.is_ready() && addr >= base && addr - base < self.total_size
    }

    /// Take ownership of a mapped region and format it as one free block.
    pub(crate) fn install(
        &mut self,
        base: *mut u8,
        total_size: usize,
        backing: Backing,
        split_threshold: usize,
    ) {
        debug_assert!(total_size % CACHE_LINE == 0 && total_size >= HEADER_SPAN);
        self.base = base;
        self.total_size = total_size;
        self.backing = backing;
        self.split_threshold = split_threshold;
        self.format();
    }

    /// Reset the region to a single free block spanning all of it.
    pub(crate) fn format(&mut self) {
        unsafe { ptr::write(self.header(0), BlockHeader::free(self.total_size, None)) };
        self.cursor = 0;
        #[cfg(feature = "double-free-check")]
        self.live.clear();
    }

    /// # Safety
    /// `offset` must be the start of a block inside the region.
    #[inline]
    pub(super) unsafe fn header(&self, offset: usize) -> *mut BlockHeader {
        debug_assert!(offset < self.total_size);
        self.base.add(offset) as *mut BlockHeader
    }

    /// Walk the block chain from the start of the region.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            pool: self,
            offset: 0,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total_size: self.total_size,
            backing: self.backing,
            ..PoolStats::default()
        };
        for block in self.blocks() {
            stats.blocks += 1;
            if block.used {
                stats.used_bytes += block.size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
                stats.largest_free = stats.largest_free.max(block.size);
            }
        }
        stats
    }

    /// Unmap memory this pool owns and return to the unmapped state. The
    /// pool stays marked as attempted.
    pub(crate) fn release(&mut self) {
        if self.is_ready() && matches!(self.backing, Backing::Anonymous(_) | Backing::File) {
            unsafe { platform::unmap(self.base, self.total_size) };
        }
        self.forget();
    }

    /// Drop the region without unmapping it. Used in a fork child, where a
    /// file mapping advised `MADV_DONTFORK` no longer exists.
    pub(crate) fn forget(&mut self) {
        self.base = ptr::null_mut();
        self.total_size = 0;
        self.cursor = 0;
        self.backing = Backing::Unmapped;
        #[cfg(feature = "double-free-check")]
        self.live.clear();
    }
}

impl Drop for HeapPool {
    fn drop(&mut self) {
        self.release();
    }
}

impl core::fmt::Debug for HeapPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapPool")
            .field("kind", &self.kind)
            .field("base", &self.base)
            .field("total_size", &self.total_size)
            .field("cursor", &self.cursor)
            .field("backing", &self.backing)
            .finish()
    }
}

/// A snapshot of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub offset: usize,
    pub size: usize,
    pub used: bool,
}

/// Iterator over a pool's blocks. Stops early on a chain that does not
/// tile the region (zero or overlong sizes).
pub struct Blocks<'a> {
    pool: &'a HeapPool,
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if !self.pool.is_ready() || self.offset >= self.pool.total_size {
            return None;
        }
        let header = unsafe { &*self.pool.header(self.offset) };
        let info = BlockInfo {
            offset: self.offset,
            size: header.size(),
            used: header.is_used(),
        };
        if info.size == 0 || info.size > self.pool.total_size - self.offset {
            self.offset = self.pool.total_size;
        } else {
            self.offset += info.size;
        }
        Some(info)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total_size: usize,
    pub backing: Backing,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    /// Largest free block, header included.
    pub largest_free: usize,
}

impl Default for PoolStats {
    fn default() -> Self {
        PoolStats {
            total_size: 0,
            backing: Backing::Unmapped,
            used_bytes: 0,
            free_bytes: 0,
            blocks: 0,
            free_blocks: 0,
            largest_free: 0,
        }
    }
}
