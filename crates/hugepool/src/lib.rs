//! A large-allocation heap over huge-page memory pools.
//!
//! Requests at or above a size threshold are carved from one of two
//! contiguous pools: a file-backed *named* pool under a configured directory
//! (for example a DAX or hugetlbfs mount), and an *anonymous* pool mapped
//! with the largest page size the system grants. Smaller requests, and
//! anything the pools cannot serve, go to the system allocator. A
//! process-wide strategy mask decides which of the three may be used.
//!
//! The crate can be used three ways: through an explicit [`HeapContext`],
//! through the process-global context ([`alloc`], [`free`], [`set_mode`],
//! the `hugepool_*` C functions, or [`HugePool`] as `#[global_allocator]`),
//! or, built with the `interpose` feature, as an `LD_PRELOAD` replacement
//! for the C allocator.

extern crate libc;

#[macro_use]
pub mod log;

pub mod allocator;
pub mod api;
pub mod config;
pub mod error;
pub mod fork;
pub mod global_alloc;
pub mod init;
pub mod mode;
pub mod platform;
pub mod pool;
pub mod router;
pub mod sync;
pub mod util;

pub use allocator::Passthrough;
pub use config::Config;
pub use error::InitError;
pub use global_alloc::HugePool;
pub use init::{alloc, free, mode, set_mode};
pub use log::Level;
pub use mode::{Mode, ModeRegistry};
pub use platform::PageSize;
pub use pool::{HeapPool, IntegrityReport, PoolKind, PoolStats};
pub use router::{Fallback, HeapContext};
