//! Allocation-free diagnostics.
//!
//! Messages are formatted into a stack buffer and written to stderr with a
//! single `write(2)`. Nothing here may allocate: these macros run inside
//! `malloc` when the crate is interposed.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Off = 0,
    Error = 1,
    Info = 2,
    Debug = 3,
}

impl Level {
    pub const DEFAULT: Level = Level::Error;

    fn tag(self) -> &'static str {
        match self {
            Level::Off => "",
            Level::Error => "error",
            Level::Info => "info",
            Level::Debug => "debug",
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(Level::DEFAULT as u8);

pub fn set_level(level: Level) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn enabled(level: Level) -> bool {
    level != Level::Off && level as u8 <= LEVEL.load(Ordering::Relaxed)
}

const RECORD_CAP: usize = 512;

/// Fixed-capacity formatting sink; output past the capacity is dropped.
pub(crate) struct StackBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> StackBuf<N> {
    pub(crate) const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl<const N: usize> Write for StackBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

#[cold]
pub fn emit(level: Level, args: fmt::Arguments<'_>) {
    let mut record = StackBuf::<RECORD_CAP>::new();
    let _ = write!(record, "hugepool: {}: ", level.tag());
    let _ = record.write_fmt(args);
    if record.len == RECORD_CAP {
        record.buf[RECORD_CAP - 1] = b'\n';
    } else {
        let _ = record.write_str("\n");
    }
    let bytes = record.as_bytes();
    unsafe {
        libc::write(2, bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

macro_rules! hp_log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::log::enabled($level) {
            $crate::log::emit($level, format_args!($($arg)*));
        }
    };
}

macro_rules! hp_error {
    ($($arg:tt)*) => { hp_log!($crate::log::Level::Error, $($arg)*) };
}

macro_rules! hp_info {
    ($($arg:tt)*) => { hp_log!($crate::log::Level::Info, $($arg)*) };
}

macro_rules! hp_debug {
    ($($arg:tt)*) => { hp_log!($crate::log::Level::Debug, $($arg)*) };
}
