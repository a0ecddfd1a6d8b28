#![no_main]

use hugepool::{Config, HeapContext, Mode, PageSize, Passthrough, PoolKind};
use libfuzzer_sys::fuzz_target;

/// Interprets a byte slice as a sequence of router operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=alloc, 1=free, 2=realloc, 3=set_mode)
///   byte 1-2: size in 64-byte units (little-endian u16), or the mode bits
///   byte 3: slot index (which tracked pointer to operate on)
///
/// We track up to 64 live pointers.
const MAX_SLOTS: usize = 64;
const MIB: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    let config = Config::new()
        .with_anon_pool_size(64 * MIB)
        .with_page_size(PageSize::Base)
        .with_alloc_threshold(4096)
        .with_split_threshold(4096);
    let ctx = HeapContext::with_config(config, Passthrough);

    let mut slots: [*mut u8; MAX_SLOTS] = [std::ptr::null_mut(); MAX_SLOTS];
    let mut sizes: [usize; MAX_SLOTS] = [0; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] & 0x03;
        let operand = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let size = operand * 64;
        let slot = (data[i + 3] as usize) % MAX_SLOTS;
        i += 4;

        match opcode {
            0 => {
                unsafe { ctx.free(slots[slot]) };
                let ptr = ctx.alloc(1, size).map_or(std::ptr::null_mut(), |p| p.as_ptr());
                if !ptr.is_null() {
                    unsafe { std::ptr::write_bytes(ptr, slot as u8, size.min(256)) };
                }
                slots[slot] = ptr;
                sizes[slot] = size;
            }
            1 => {
                unsafe { ctx.free(slots[slot]) };
                slots[slot] = std::ptr::null_mut();
                sizes[slot] = 0;
            }
            2 => {
                // realloc(p, 0) may free p and still report failure.
                let size = size.max(1);
                if let Some(p) = unsafe { ctx.realloc(slots[slot], size) } {
                    let kept = sizes[slot].min(size).min(256);
                    if !slots[slot].is_null() && kept > 0 {
                        // Contents written at alloc time must survive the move.
                        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), kept) };
                        assert!(bytes.iter().all(|&b| b == slot as u8));
                    } else {
                        unsafe { std::ptr::write_bytes(p.as_ptr(), slot as u8, size.min(256)) };
                    }
                    slots[slot] = p.as_ptr();
                    sizes[slot] = size;
                }
            }
            _ => {
                // Keep the fallback on so live fallback pointers stay valid
                // to free; only the pools are toggled.
                let mode = Mode::from_bits_truncate(operand as u32) | Mode::FALLBACK_ALLOCATOR;
                ctx.set_mode(mode);
            }
        }
    }

    if let Some(report) = ctx.check_integrity(PoolKind::Anonymous) {
        assert!(report.is_ok(), "{:?}", report);
    }
    for ptr in slots {
        unsafe { ctx.free(ptr) };
    }
    if let Some(stats) = ctx.stats(PoolKind::Anonymous) {
        assert_eq!(stats.blocks, 1, "{:?}", stats);
    }
});
