//! In-region block metadata.
//!
//! Every block in a pool starts with a [`BlockHeader`]; headers tile the pool
//! with no gaps. The low bit of the size word marks the block as used (sizes
//! are cache-line multiples, so the bit is otherwise always zero). `prev` is
//! the offset of the preceding block from the pool base, so the chain can be
//! walked backwards without raw self-referential pointers.

use crate::util::{align_up, checked_align_up, CACHE_LINE};
use core::mem::size_of;

pub const USED_BIT: usize = 1;
pub const SIZE_MASK: usize = !USED_BIT;
pub const NO_PREV: usize = usize::MAX;

/// Bytes between a header and the payload it describes.
pub const HEADER_SPAN: usize = align_up(size_of::<BlockHeader>(), CACHE_LINE);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    size_and_used: usize,
    prev: usize,
}

impl BlockHeader {
    pub const fn free(size: usize, prev: Option<usize>) -> Self {
        BlockHeader {
            size_and_used: size & SIZE_MASK,
            prev: match prev {
                Some(off) => off,
                None => NO_PREV,
            },
        }
    }

    /// Full block size in bytes, header included.
    #[inline]
    pub fn size(&self) -> usize {
        self.size_and_used & SIZE_MASK
    }

    /// Replace the size, keeping the used flag.
    #[inline]
    pub fn set_size(&mut self, size: usize) {
        debug_assert!(size % CACHE_LINE == 0);
        self.size_and_used = (self.size_and_used & USED_BIT) | (size & SIZE_MASK);
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.size_and_used & USED_BIT != 0
    }

    #[inline]
    pub fn set_used(&mut self, used: bool) {
        if used {
            self.size_and_used |= USED_BIT;
        } else {
            self.size_and_used &= SIZE_MASK;
        }
    }

    #[inline]
    pub fn prev(&self) -> Option<usize> {
        if self.prev == NO_PREV {
            None
        } else {
            Some(self.prev)
        }
    }

    #[inline]
    pub fn set_prev(&mut self, prev: Option<usize>) {
        self.prev = prev.unwrap_or(NO_PREV);
    }
}

/// Block size needed to hand out `request` payload bytes, or `None` if the
/// arithmetic would wrap.
#[inline]
pub const fn block_size_for(request: usize) -> Option<usize> {
    match checked_align_up(request, CACHE_LINE) {
        Some(payload) => payload.checked_add(HEADER_SPAN),
        None => None,
    }
}
