//! Crawl statistics
//!
//! Counters are atomics so a progress reporter can read them while the
//! crawl is running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters for one crawl
#[derive(Debug, Default)]
pub struct CrawlStats {
    /// Directories listed successfully
    pub dirs_listed: AtomicU64,

    /// Entries surfaced to the caller
    pub entries: AtomicU64,

    /// Directories whose listing failed (skipped subtrees)
    pub dir_errors: AtomicU64,

    /// Pool connections retired after a stall or connection failure
    pub retired_connections: AtomicU64,
}

impl CrawlStats {
    pub(crate) fn record_listing(&self) {
        self.dirs_listed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_entry(&self) {
        self.entries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dir_error(&self) {
        self.dir_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retired(&self) {
        self.retired_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self, elapsed: Duration) -> CrawlProgress {
        CrawlProgress {
            dirs_listed: self.dirs_listed.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            dir_errors: self.dir_errors.load(Ordering::Relaxed),
            retired_connections: self.retired_connections.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Snapshot of crawl progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrawlProgress {
    pub dirs_listed: u64,
    pub entries: u64,
    pub dir_errors: u64,
    pub retired_connections: u64,
    pub elapsed: Duration,
}

impl CrawlProgress {
    /// Entries surfaced per second
    pub fn entries_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.entries as f64 / secs
        } else {
            0.0
        }
    }
}
