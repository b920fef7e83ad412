//! Shared per-stage counters. The only state the three pipeline stages
//! share besides the options registry; updates are atomic adds.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Progress {
    rows_read: AtomicU64,
    rows_transformed: AtomicU64,
    rows_written: AtomicU64,
    bytes_written: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub rows_read: u64,
    pub rows_transformed: u64,
    pub rows_written: u64,
    pub bytes_written: u64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&self, rows: u64) {
        self.rows_read.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_transformed(&self, rows: u64) {
        self.rows_transformed.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_written(&self, rows: u64) {
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    /// Bytes come from the writer's own monotonic counter.
    pub fn record_bytes(&self, total: u64) {
        self.bytes_written.store(total, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_transformed: self.rows_transformed.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}
