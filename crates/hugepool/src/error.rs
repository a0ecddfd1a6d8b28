use thiserror::Error;

/// Why a pool could not be brought up. Never fatal: the pool stays unusable
/// and the router skips it from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("no backing-store path configured")]
    NotConfigured,
    #[error("requested pool size rounds down to zero")]
    ZeroSize,
    #[error("backing-store path is too long")]
    PathTooLong,
    #[error("cannot create backing file (errno {errno})")]
    Create { errno: i32 },
    #[error("cannot reserve {size} bytes in backing file (errno {errno})")]
    Reserve { size: usize, errno: i32 },
    #[error("cannot map {size} bytes (errno {errno})")]
    Map { size: usize, errno: i32 },
    #[error("no page size could map {requested} bytes")]
    NoPageSize { requested: usize },
    #[error("pool initialization already failed")]
    AlreadyFailed,
}
