use core::sync::atomic::{AtomicUsize, Ordering};

pub const KIB: usize = 1 << 10;
pub const MIB: usize = 1 << 20;
pub const GIB: usize = 1 << 30;
pub const TIB: usize = 1 << 40;

/// Granularity of block sizes and of the header span.
pub const CACHE_LINE: usize = 64;

/// Alignment promised by the fallback path (matches max_align_t on 64-bit).
pub const MIN_ALIGN: usize = 16;

/// Smallest huge page we map. Doubles as the default routing threshold and
/// the default minimum remainder worth splitting off a block.
pub const MIN_HUGE_PAGE: usize = 2 * MIB;

/// Default requested size of each pool.
pub const DEFAULT_POOL_SIZE: usize = GIB;

/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Like [`align_up`], but `None` instead of wrapping past `usize::MAX`.
#[inline(always)]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Round `value` down to a multiple of `multiple`, which need not be a power
/// of two (page sizes come from configuration).
#[inline(always)]
pub const fn round_down(value: usize, multiple: usize) -> usize {
    if multiple == 0 {
        return 0;
    }
    value - value % multiple
}

#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Cached sysconf(_SC_PAGESIZE). Zero until first queried.
static PAGE_SIZE_CACHED: AtomicUsize = AtomicUsize::new(0);

/// The system's base page size.
pub fn page_size() -> usize {
    let cached = PAGE_SIZE_CACHED.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let ps = if ps > 0 { ps as usize } else { 4096 };
    PAGE_SIZE_CACHED.store(ps, Ordering::Relaxed);
    ps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_up(0, CACHE_LINE), 0);
        assert_eq!(align_up(1, CACHE_LINE), 64);
        assert_eq!(align_up(64, CACHE_LINE), 64);
        assert_eq!(checked_align_up(usize::MAX, CACHE_LINE), None);
        assert_eq!(round_down(5 * MIB, 2 * MIB), 4 * MIB);
        assert_eq!(round_down(MIB, 2 * MIB), 0);
        assert!(is_aligned(128, CACHE_LINE));
        assert!(!is_aligned(130, CACHE_LINE));
    }

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }
}
