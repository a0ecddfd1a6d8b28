//! Contiguous huge-page pools and the first-fit block allocator that carves
//! them up.

pub mod acquire;
pub mod block;
pub mod header;
pub mod heap;
pub mod self_check;
#[cfg(feature = "double-free-check")]
pub mod shadow;

pub use heap::{Backing, BlockInfo, HeapPool, PoolStats};
pub use self_check::IntegrityReport;

use crate::mode::Mode;

/// Which of the two pools a [`HeapPool`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Backed by a per-process file under the configured base path.
    Named,
    /// Backed by private anonymous memory.
    Anonymous,
}

impl PoolKind {
    /// Order in which the router tries the pools.
    pub const PRIORITY: [PoolKind; 2] = [PoolKind::Named, PoolKind::Anonymous];

    pub fn name(self) -> &'static str {
        match self {
            PoolKind::Named => "named",
            PoolKind::Anonymous => "anonymous",
        }
    }

    /// The mode bit that enables this pool.
    pub fn mode_bit(self) -> Mode {
        match self {
            PoolKind::Named => Mode::NAMED_POOL,
            PoolKind::Anonymous => Mode::ANON_POOL,
        }
    }
}
