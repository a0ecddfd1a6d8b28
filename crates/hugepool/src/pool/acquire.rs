//! Bringing a pool's memory into existence.
//!
//! The named pool maps a per-process file under the configured base path;
//! the anonymous pool walks page sizes from largest to smallest until one
//! maps. Either way a pool is attempted once: a failure is logged and the
//! pool stays unusable, with the router moving on to the next strategy.

use super::heap::{Backing, HeapPool};
use super::PoolKind;
use crate::config::{Config, BASE_PATH_CAP};
use crate::error::InitError;
use crate::platform::{self, PageSize};
use crate::util::{page_size, round_down};
use core::ffi::CStr;

/// Digits in the zero-padded process id that names a backing file.
const PID_DIGITS: usize = 10;

/// A mapped region waiting to be installed in a pool.
struct Region {
    base: *mut u8,
    size: usize,
    backing: Backing,
}

/// Map memory for `pool` if that has not been tried yet.
///
/// Idempotent: a ready pool returns `Ok`, a pool whose earlier attempt
/// failed returns [`InitError::AlreadyFailed`] without retrying.
pub fn acquire(pool: &mut HeapPool, requested: usize, config: &Config) -> Result<(), InitError> {
    if pool.attempted() {
        return if pool.is_ready() {
            Ok(())
        } else {
            Err(InitError::AlreadyFailed)
        };
    }
    pool.mark_attempted();

    let kind = pool.kind();
    let mapped = match kind {
        PoolKind::Named => map_named(requested, config),
        PoolKind::Anonymous => map_anonymous(requested, config),
    };
    match mapped {
        Ok(region) => {
            pool.install(region.base, region.size, region.backing, config.split_threshold);
            hp_info!(
                "{} pool: {} bytes at {:p} ({:?})",
                kind.name(),
                region.size,
                region.base,
                region.backing
            );
            Ok(())
        }
        Err(InitError::NotConfigured) => {
            hp_debug!("{} pool: no base path, pool disabled", kind.name());
            Err(InitError::NotConfigured)
        }
        Err(err) => {
            hp_error!("{} pool unavailable: {}", kind.name(), err);
            Err(err)
        }
    }
}

fn map_named(requested: usize, config: &Config) -> Result<Region, InitError> {
    let base_path = config.base_path().ok_or(InitError::NotConfigured)?;
    let size = round_down(requested, page_size());
    if size == 0 {
        return Err(InitError::ZeroSize);
    }
    let path =
        BackingPath::new(base_path, platform::process_id()).ok_or(InitError::PathTooLong)?;
    let path = path.as_c_str();

    let fd = platform::create_file(path).map_err(|errno| InitError::Create { errno })?;
    let mapped = platform::reserve_file(fd, size)
        .map_err(|errno| InitError::Reserve { size, errno })
        .and_then(|()| {
            let base = unsafe { platform::map_shared(fd, size) };
            if base.is_null() {
                Err(InitError::Map {
                    size,
                    errno: platform::errno(),
                })
            } else {
                Ok(base)
            }
        });
    // The mapping keeps the file alive; the descriptor is not needed.
    platform::close(fd);

    match mapped {
        Ok(base) => {
            unsafe {
                platform::advise_huge(base, size);
                platform::advise_dont_fork(base, size);
            }
            if !config.keep_backing_file {
                platform::unlink(path);
            }
            Ok(Region {
                base,
                size,
                backing: Backing::File,
            })
        }
        Err(err) => {
            platform::unlink(path);
            Err(err)
        }
    }
}

fn map_anonymous(requested: usize, config: &Config) -> Result<Region, InitError> {
    if requested == 0 {
        return Err(InitError::ZeroSize);
    }
    let preferred;
    let tiers: &[PageSize] = match config.page_size {
        Some(page) => {
            preferred = [page];
            &preferred
        }
        None => &PageSize::CASCADE,
    };

    for &page in tiers {
        let size = round_down(requested, page.bytes());
        if size == 0 {
            hp_debug!("{} bytes is below one {} page, skipping", requested, page.label());
            continue;
        }
        let base = unsafe { platform::map_anonymous(size, page) };
        if !base.is_null() {
            return Ok(Region {
                base,
                size,
                backing: Backing::Anonymous(page),
            });
        }
        hp_debug!(
            "{} bytes of {} pages failed (errno {})",
            size,
            page.label(),
            platform::errno()
        );
    }
    Err(InitError::NoPageSize { requested })
}

/// `<base>/<pid>` as a NUL-terminated path, built without allocating.
struct BackingPath {
    buf: [u8; BASE_PATH_CAP + PID_DIGITS + 2],
    len: usize,
}

impl BackingPath {
    fn new(base: &[u8], pid: u32) -> Option<Self> {
        if base.is_empty() || base.len() > BASE_PATH_CAP || base.contains(&0) {
            return None;
        }
        let mut path = BackingPath {
            buf: [0; BASE_PATH_CAP + PID_DIGITS + 2],
            len: 0,
        };
        path.buf[..base.len()].copy_from_slice(base);
        path.len = base.len();
        if base[base.len() - 1] != b'/' {
            path.buf[path.len] = b'/';
            path.len += 1;
        }
        let mut rest = pid;
        for i in (0..PID_DIGITS).rev() {
            path.buf[path.len + i] = b'0' + (rest % 10) as u8;
            rest /= 10;
        }
        path.len += PID_DIGITS;
        Some(path)
    }

    fn as_c_str(&self) -> &CStr {
        // `new` rejects interior NULs and the buffer is zero past `len`.
        unsafe { CStr::from_bytes_with_nul_unchecked(&self.buf[..=self.len]) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::MIB;

    #[test]
    fn backing_path_pads_pid() {
        let path = BackingPath::new(b"/mnt/pmem", 4242).unwrap();
        assert_eq!(path.as_c_str().to_bytes(), b"/mnt/pmem/0000004242");
        let path = BackingPath::new(b"/tmp/", u32::MAX).unwrap();
        assert_eq!(path.as_c_str().to_bytes(), b"/tmp/4294967295");
    }

    #[test]
    fn backing_path_rejects_bad_bases() {
        assert!(BackingPath::new(b"", 1).is_none());
        assert!(BackingPath::new(b"/a\0b", 1).is_none());
        assert!(BackingPath::new(&[b'a'; BASE_PATH_CAP + 1], 1).is_none());
        assert!(BackingPath::new(&[b'a'; BASE_PATH_CAP], 1).is_some());
    }

    #[test]
    fn named_pool_without_base_path_is_disabled_for_good() {
        let mut pool = HeapPool::new(PoolKind::Named);
        let config = Config::new();
        assert_eq!(acquire(&mut pool, MIB, &config), Err(InitError::NotConfigured));
        assert_eq!(acquire(&mut pool, MIB, &config), Err(InitError::AlreadyFailed));
        assert!(!pool.is_ready());
    }

    #[test]
    fn anonymous_pool_on_base_pages() {
        let mut pool = HeapPool::new(PoolKind::Anonymous);
        let config = Config::new().with_page_size(PageSize::Base);
        acquire(&mut pool, 8 * MIB + 123, &config).unwrap();
        assert_eq!(pool.total_size(), round_down(8 * MIB + 123, page_size()));
        assert_eq!(pool.backing(), Backing::Anonymous(PageSize::Base));
        assert_eq!(pool.split_threshold(), config.split_threshold);
        // Second call is a no-op.
        acquire(&mut pool, 64 * MIB, &config).unwrap();
        assert_eq!(pool.total_size(), round_down(8 * MIB + 123, page_size()));
    }

    #[test]
    fn anonymous_cascade_lands_somewhere() {
        let mut pool = HeapPool::new(PoolKind::Anonymous);
        acquire(&mut pool, 4 * MIB, &Config::new()).unwrap();
        // 4 MiB is below one giant page, so the cascade starts at 2 MiB pages.
        assert!(matches!(
            pool.backing(),
            Backing::Anonymous(PageSize::Huge) | Backing::Anonymous(PageSize::Base)
        ));
        assert!(pool.allocate(MIB).is_some());
    }

    #[test]
    fn below_one_page_fails() {
        let mut pool = HeapPool::new(PoolKind::Anonymous);
        let config = Config::new().with_page_size(PageSize::Huge);
        assert_eq!(
            acquire(&mut pool, MIB, &config),
            Err(InitError::NoPageSize { requested: MIB })
        );
    }

    #[test]
    fn named_pool_maps_and_unlinks_file() {
        let dir = std::env::temp_dir().join(format!("hugepool-acquire-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = Config::new()
            .with_base_path(dir.as_os_str().as_encoded_bytes())
            .with_named_pool_size(4 * MIB);
        let mut pool = HeapPool::new(PoolKind::Named);
        acquire(&mut pool, config.named_pool_size, &config).unwrap();
        assert_eq!(pool.backing(), Backing::File);
        assert_eq!(pool.total_size(), 4 * MIB);
        let file = dir.join(format!("{:010}", std::process::id()));
        assert!(!file.exists());
        let p = pool.allocate(MIB).unwrap();
        unsafe { p.as_ptr().write_bytes(0xA5, MIB) };
        drop(pool);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn named_pool_in_missing_directory_fails() {
        let config = Config::new().with_base_path("/nonexistent/hugepool/dir");
        let mut pool = HeapPool::new(PoolKind::Named);
        assert!(matches!(
            acquire(&mut pool, 4 * MIB, &config),
            Err(InitError::Create { .. })
        ));
        assert!(!pool.is_ready());
    }
}
