//! Pool configuration.
//!
//! A [`Config`] is a plain value: explicit contexts take one directly, the
//! process-global context builds one from `HUGEPOOL_*` environment variables
//! on first use. Parsing never allocates, and malformed values fall back to
//! the defaults.

use crate::log::Level;
use crate::mode::Mode;
use crate::platform::PageSize;
use crate::util::{DEFAULT_POOL_SIZE, GIB, KIB, MIB, MIN_HUGE_PAGE, TIB};

pub const ENV_BASE_PATH: &str = "HUGEPOOL_BASEPATH";
pub const ENV_NAMED_SIZE: &str = "HUGEPOOL_NAMED_SIZE";
pub const ENV_ANON_SIZE: &str = "HUGEPOOL_ANON_SIZE";
pub const ENV_THRESHOLD: &str = "HUGEPOOL_THRESHOLD";
pub const ENV_SPLIT_THRESHOLD: &str = "HUGEPOOL_SPLIT_THRESHOLD";
pub const ENV_MODE: &str = "HUGEPOOL_MODE";
pub const ENV_PAGE_SIZE: &str = "HUGEPOOL_PAGE_SIZE";
pub const ENV_LOG: &str = "HUGEPOOL_LOG";
pub const ENV_KEEP_FILE: &str = "HUGEPOOL_KEEP_FILE";

/// Longest backing-store directory we accept, in bytes.
pub const BASE_PATH_CAP: usize = 256;

#[derive(Clone, Copy)]
pub struct Config {
    base_path: [u8; BASE_PATH_CAP],
    base_path_len: usize,
    pub named_pool_size: usize,
    pub anon_pool_size: usize,
    /// Requests of at least this many bytes are routed to a pool.
    pub alloc_threshold: usize,
    /// A free remainder is split off only when larger than this.
    pub split_threshold: usize,
    pub initial_mode: Mode,
    /// Restrict the anonymous page-size cascade to one tier.
    pub page_size: Option<PageSize>,
    pub log_level: Level,
    /// Leave the named pool's file on disk after mapping it.
    pub keep_backing_file: bool,
}

impl Config {
    pub const fn new() -> Self {
        Config {
            base_path: [0; BASE_PATH_CAP],
            base_path_len: 0,
            named_pool_size: DEFAULT_POOL_SIZE,
            anon_pool_size: DEFAULT_POOL_SIZE,
            alloc_threshold: MIN_HUGE_PAGE,
            split_threshold: MIN_HUGE_PAGE,
            initial_mode: Mode::ALL,
            page_size: None,
            log_level: Level::DEFAULT,
            keep_backing_file: false,
        }
    }

    /// Directory for the named pool's backing file, if configured.
    pub fn base_path(&self) -> Option<&[u8]> {
        if self.base_path_len == 0 {
            None
        } else {
            Some(&self.base_path[..self.base_path_len])
        }
    }

    /// Enable the named pool under `path`. An empty path disables it; a path
    /// that does not fit [`BASE_PATH_CAP`] is ignored.
    pub fn with_base_path(mut self, path: impl AsRef<[u8]>) -> Self {
        self.set_base_path(path.as_ref());
        self
    }

    fn set_base_path(&mut self, path: &[u8]) {
        // Interior NULs would silently shorten the path handed to open(2).
        if path.len() >= BASE_PATH_CAP || path.contains(&0) {
            hp_error!(
                "backing-store path ignored: longer than {} bytes or malformed",
                BASE_PATH_CAP - 1
            );
            return;
        }
        self.base_path[..path.len()].copy_from_slice(path);
        self.base_path_len = path.len();
    }

    pub fn with_named_pool_size(mut self, bytes: usize) -> Self {
        self.named_pool_size = bytes;
        self
    }

    pub fn with_anon_pool_size(mut self, bytes: usize) -> Self {
        self.anon_pool_size = bytes;
        self
    }

    pub fn with_alloc_threshold(mut self, bytes: usize) -> Self {
        self.alloc_threshold = bytes;
        self
    }

    pub fn with_split_threshold(mut self, bytes: usize) -> Self {
        self.split_threshold = bytes;
        self
    }

    pub fn with_initial_mode(mut self, mode: Mode) -> Self {
        self.initial_mode = mode;
        self
    }

    pub fn with_page_size(mut self, page: PageSize) -> Self {
        self.page_size = Some(page);
        self
    }

    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_keep_backing_file(mut self, keep: bool) -> Self {
        self.keep_backing_file = keep;
        self
    }

    /// Build a configuration from `HUGEPOOL_*` environment variables.
    ///
    /// # Safety
    /// Calls `libc::getenv`, which races with concurrent `setenv`.
    pub unsafe fn from_env() -> Self {
        Self::from_lookup(|key| getenv_bytes(key))
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<'a>(lookup: impl Fn(&str) -> Option<&'a [u8]>) -> Self {
        let mut config = Config::new();

        // Log level first so the remaining parse errors respect it.
        if let Some(raw) = lookup(ENV_LOG) {
            config.log_level = or_default(ENV_LOG, parse_level(raw), Level::DEFAULT);
            crate::log::set_level(config.log_level);
        }
        if let Some(raw) = lookup(ENV_BASE_PATH) {
            config.set_base_path(raw);
        }
        if let Some(raw) = lookup(ENV_NAMED_SIZE) {
            config.named_pool_size =
                or_default(ENV_NAMED_SIZE, parse_size(raw), DEFAULT_POOL_SIZE);
        }
        if let Some(raw) = lookup(ENV_ANON_SIZE) {
            config.anon_pool_size =
                or_default(ENV_ANON_SIZE, parse_size(raw), DEFAULT_POOL_SIZE);
        }
        if let Some(raw) = lookup(ENV_THRESHOLD) {
            config.alloc_threshold = or_default(ENV_THRESHOLD, parse_size(raw), MIN_HUGE_PAGE);
        }
        if let Some(raw) = lookup(ENV_SPLIT_THRESHOLD) {
            config.split_threshold =
                or_default(ENV_SPLIT_THRESHOLD, parse_size(raw), MIN_HUGE_PAGE);
        }
        if let Some(raw) = lookup(ENV_MODE) {
            config.initial_mode = or_default(ENV_MODE, parse_mode(raw), Mode::ALL);
        }
        if let Some(raw) = lookup(ENV_PAGE_SIZE) {
            config.page_size =
                or_default(ENV_PAGE_SIZE, parse_page_size(raw).map(Some), None);
        }
        if let Some(raw) = lookup(ENV_KEEP_FILE) {
            config.keep_backing_file = or_default(ENV_KEEP_FILE, parse_bool(raw), false);
        }
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

impl core::fmt::Debug for Config {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let base = self.base_path().and_then(|p| core::str::from_utf8(p).ok());
        f.debug_struct("Config")
            .field("base_path", &base)
            .field("named_pool_size", &self.named_pool_size)
            .field("anon_pool_size", &self.anon_pool_size)
            .field("alloc_threshold", &self.alloc_threshold)
            .field("split_threshold", &self.split_threshold)
            .field("initial_mode", &self.initial_mode)
            .field("page_size", &self.page_size)
            .field("log_level", &self.log_level)
            .field("keep_backing_file", &self.keep_backing_file)
            .finish()
    }
}

fn or_default<T>(key: &str, parsed: Option<T>, default: T) -> T {
    match parsed {
        Some(v) => v,
        None => {
            hp_info!("ignoring malformed {}, using the default", key);
            default
        }
    }
}

/// Look up an environment variable without allocating.
///
/// # Safety
/// Calls `libc::getenv`.
unsafe fn getenv_bytes(key: &str) -> Option<&'static [u8]> {
    let mut name = [0u8; 64];
    if key.len() >= name.len() {
        return None;
    }
    name[..key.len()].copy_from_slice(key.as_bytes());
    let val = libc::getenv(name.as_ptr() as *const libc::c_char);
    if val.is_null() {
        return None;
    }
    Some(core::ffi::CStr::from_ptr(val).to_bytes())
}

fn trim(raw: &[u8]) -> &[u8] {
    let start = raw.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(raw.len());
    let end = raw.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |e| e + 1);
    &raw[start..end]
}

fn parse_decimal(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() {
        return None;
    }
    let mut result: usize = 0;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((byte - b'0') as usize)?;
    }
    Some(result)
}

fn parse_hex(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() {
        return None;
    }
    let mut result: usize = 0;
    for &byte in digits {
        let nibble = (byte as char).to_digit(16)? as usize;
        result = result.checked_mul(16)?.checked_add(nibble)?;
    }
    Some(result)
}

/// Parse a byte count: decimal digits with an optional binary suffix
/// `K`, `M`, `G` or `T` (case-insensitive, `KB`/`KiB` spellings accepted).
pub fn parse_size(raw: &[u8]) -> Option<usize> {
    let s = trim(raw);
    let digits_end = s.iter().position(|b| !b.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(digits_end);
    let value = parse_decimal(digits)?;
    let multiplier = if one_of(suffix, &[b"", b"b"]) {
        1
    } else if one_of(suffix, &[b"k", b"kb", b"kib"]) {
        KIB
    } else if one_of(suffix, &[b"m", b"mb", b"mib"]) {
        MIB
    } else if one_of(suffix, &[b"g", b"gb", b"gib"]) {
        GIB
    } else if one_of(suffix, &[b"t", b"tb", b"tib"]) {
        TIB
    } else {
        return None;
    };
    value.checked_mul(multiplier)
}

/// Parse a strategy mask: decimal, `0x` hex, or a `,`/`|` separated list of
/// `fallback`, `anon`, `named`, `all`, `none`.
pub fn parse_mode(raw: &[u8]) -> Option<Mode> {
    let s = trim(raw);
    if s.is_empty() {
        return None;
    }
    if let Some(hex) = s.strip_prefix(b"0x").or_else(|| s.strip_prefix(b"0X")) {
        return parse_hex(hex).and_then(mask_from_number);
    }
    if s[0].is_ascii_digit() {
        return parse_decimal(s).and_then(mask_from_number);
    }
    let mut mode = Mode::NONE;
    for word in s.split(|&b| b == b',' || b == b'|') {
        let word = trim(word);
        let bit = if one_of(word, &[b"fallback", b"malloc"]) {
            Mode::FALLBACK_ALLOCATOR
        } else if one_of(word, &[b"anon", b"anonymous"]) {
            Mode::ANON_POOL
        } else if one_of(word, &[b"named", b"file", b"pmem"]) {
            Mode::NAMED_POOL
        } else if one_of(word, &[b"all"]) {
            Mode::ALL
        } else if one_of(word, &[b"none"]) {
            Mode::NONE
        } else {
            return None;
        };
        mode = mode | bit;
    }
    Some(mode)
}

fn mask_from_number(value: usize) -> Option<Mode> {
    let bits = u32::try_from(value).ok()?;
    Some(Mode::from_bits_truncate(bits))
}

/// Parse a preferred page size: `1G`, `2M`, `4K`/`base`, or the byte count.
pub fn parse_page_size(raw: &[u8]) -> Option<PageSize> {
    let s = trim(raw);
    if s.eq_ignore_ascii_case(b"base") || s.eq_ignore_ascii_case(b"thp") {
        return Some(PageSize::Base);
    }
    match parse_size(s)? {
        GIB => Some(PageSize::Giant),
        n if n == 2 * MIB => Some(PageSize::Huge),
        n if n == crate::util::page_size() || n == 4 * KIB => Some(PageSize::Base),
        _ => None,
    }
}

pub fn parse_level(raw: &[u8]) -> Option<Level> {
    let s = trim(raw);
    if one_of(s, &[b"0", b"off", b"none"]) {
        Some(Level::Off)
    } else if one_of(s, &[b"1", b"error"]) {
        Some(Level::Error)
    } else if one_of(s, &[b"2", b"info"]) {
        Some(Level::Info)
    } else if one_of(s, &[b"3", b"debug", b"trace"]) {
        Some(Level::Debug)
    } else {
        None
    }
}

fn parse_bool(raw: &[u8]) -> Option<bool> {
    let s = trim(raw);
    if one_of(s, &[b"1", b"yes", b"true", b"on"]) {
        Some(true)
    } else if one_of(s, &[b"0", b"no", b"false", b"off"]) {
        Some(false)
    } else {
        None
    }
}

/// Case-insensitive membership test. Runs inside malloc, so no lowercase copies.
fn one_of(s: &[u8], options: &[&[u8]]) -> bool {
    options.iter().any(|o| s.eq_ignore_ascii_case(o))
}
