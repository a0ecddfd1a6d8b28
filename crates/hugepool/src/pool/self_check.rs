use super::header::HEADER_SPAN;
use super::heap::HeapPool;
use crate::util::CACHE_LINE;

/// Result of walking a pool's block chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityReport {
    pub blocks: usize,
    pub free_blocks: usize,
    pub errors_found: usize,
    /// Blocks that do not tile the region exactly (bad size, overrun, gap).
    pub tiling_errors: usize,
    /// `prev` links that do not name the preceding block.
    pub prev_link_errors: usize,
    /// Adjacent free blocks that should have been merged.
    pub unmerged_neighbors: usize,
    /// Cursor not on a block boundary, or a free block before it.
    pub cursor_errors: usize,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.errors_found == 0
    }
}

impl HeapPool {
    /// Walk every header and verify the chain invariants. An unmapped pool
    /// reports nothing.
    pub fn check_integrity(&self) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        if !self.is_ready() {
            return report;
        }

        let mut offset = 0;
        let mut expected_prev = None;
        let mut prev_free = false;
        let mut cursor_seen = self.cursor == self.total_size;
        while offset < self.total_size {
            let header = unsafe { &*self.header(offset) };
            let size = header.size();
            report.blocks += 1;

            if offset == self.cursor {
                cursor_seen = true;
            }
            if header.prev() != expected_prev {
                report.prev_link_errors += 1;
            }
            if !header.is_used() {
                report.free_blocks += 1;
                if prev_free {
                    report.unmerged_neighbors += 1;
                }
                if offset < self.cursor {
                    report.cursor_errors += 1;
                }
            }
            if size < HEADER_SPAN || size % CACHE_LINE != 0 || size > self.total_size - offset {
                report.tiling_errors += 1;
                break;
            }

            prev_free = !header.is_used();
            expected_prev = Some(offset);
            offset += size;
        }
        if !cursor_seen {
            report.cursor_errors += 1;
        }

        report.errors_found = report.tiling_errors
            + report.prev_link_errors
            + report.unmerged_neighbors
            + report.cursor_errors;
        if !report.is_ok() {
            hp_error!(
                "{} pool: integrity check found {} errors",
                self.kind.name(),
                report.errors_found
            );
        }
        report
    }
}
