use core::fmt;
use core::ops::{BitAnd, BitOr, Not};
use core::sync::atomic::{AtomicU32, Ordering};

/// Strategy mask selecting which backing strategies may serve a request.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(u32);

impl Mode {
    /// Delegate to the allocator we replaced (libc, or the next in chain).
    pub const FALLBACK_ALLOCATOR: Mode = Mode(1 << 0);
    /// Serve from the anonymous huge-page pool.
    pub const ANON_POOL: Mode = Mode(1 << 1);
    /// Serve from the file-backed pool.
    pub const NAMED_POOL: Mode = Mode(1 << 2);

    pub const NONE: Mode = Mode(0);
    pub const ALL: Mode = Mode(0b111);

    /// Keep only the recognized bits.
    pub const fn from_bits_truncate(bits: u32) -> Mode {
        Mode(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Mode) -> Mode {
        Mode(self.0 | other.0)
    }

    pub const fn difference(self, other: Mode) -> Mode {
        Mode(self.0 & !other.0)
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::ALL
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        self.union(rhs)
    }
}

impl BitAnd for Mode {
    type Output = Mode;

    fn bitand(self, rhs: Mode) -> Mode {
        Mode(self.0 & rhs.0)
    }
}

impl Not for Mode {
    type Output = Mode;

    fn not(self) -> Mode {
        Mode::ALL.difference(self)
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (bit, name) in [
            (Mode::FALLBACK_ALLOCATOR, "FALLBACK_ALLOCATOR"),
            (Mode::ANON_POOL, "ANON_POOL"),
            (Mode::NAMED_POOL, "NAMED_POOL"),
        ] {
            if self.contains(bit) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

/// Process- or context-wide strategy mask.
pub struct ModeRegistry {
    bits: AtomicU32,
}

impl ModeRegistry {
    pub const fn new(initial: Mode) -> Self {
        Self {
            bits: AtomicU32::new(initial.0),
        }
    }

    pub fn get(&self) -> Mode {
        Mode(self.bits.load(Ordering::Acquire))
    }

    /// Replace the mask and hand back the old one so callers can restore it.
    pub fn set(&self, mode: Mode) -> Mode {
        Mode(self.bits.swap(mode.0 & Mode::ALL.0, Ordering::AcqRel))
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new(Mode::ALL)
    }
}
