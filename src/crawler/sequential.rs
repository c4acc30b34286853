//! Sequential crawler
//!
//! One session, one request at a time, blocking listings. Entries come
//! out in depth-first pre-order: a directory is yielded, then its
//! contents, before its next sibling.

use crate::crawler::stats::CrawlStats;
use crate::nfs::transport::Session;
use crate::nfs::types::Entry;
use std::collections::HashSet;
use std::sync::Arc;
use std::vec;
use tracing::{debug, trace, warn};

/// Depth-first crawler over a single synchronous session
pub struct SequentialCrawler<S: Session> {
    /// Released as soon as the traversal is exhausted
    session: Option<S>,

    /// Remaining entries of every directory on the current path
    stack: Vec<vec::IntoIter<Entry>>,

    /// Directory to list before yielding anything else
    descend: Option<String>,

    /// Directories already scheduled
    seen: HashSet<String>,

    stats: Arc<CrawlStats>,
}

impl<S: Session> SequentialCrawler<S> {
    pub fn new(session: S, start: &str, stats: Arc<CrawlStats>) -> Self {
        let mut seen = HashSet::new();
        seen.insert(start.to_string());

        Self {
            session: Some(session),
            stack: Vec::new(),
            descend: Some(start.to_string()),
            seen,
            stats,
        }
    }

    fn list(&mut self, path: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.list(path) {
            Ok(entries) => {
                trace!(path = %path, entries = entries.len(), "Directory listed");
                self.stats.record_listing();
                self.stack.push(entries.into_iter());
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Directory listing failed, skipping subtree");
                self.stats.record_dir_error();
            }
        }
    }

    fn release(&mut self) {
        if self.session.take().is_some() {
            debug!("Traversal exhausted, session released");
        }
    }
}

impl<S: Session> Iterator for SequentialCrawler<S> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        loop {
            if let Some(path) = self.descend.take() {
                self.list(&path);
            }

            let Some(current) = self.stack.last_mut() else {
                self.release();
                return None;
            };

            let Some(entry) = current.next() else {
                self.stack.pop();
                continue;
            };

            if entry.is_dir() {
                if !self.seen.insert(entry.path.clone()) {
                    debug!(path = %entry.path, "Directory already seen, skipping");
                    continue;
                }
                self.descend = Some(entry.path.clone());
            }

            self.stats.record_entry();
            return Some(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NfsError;
    use crate::nfs::memory::{MemoryShare, MemoryTransport};
    use crate::nfs::transport::Transport;
    use std::sync::atomic::Ordering;

    fn crawl(transport: &MemoryTransport, start: &str) -> (Vec<String>, Arc<CrawlStats>) {
        let stats = Arc::new(CrawlStats::default());
        let session = transport.open().unwrap();
        let paths = SequentialCrawler::new(session, start, Arc::clone(&stats))
            .map(|e| e.path)
            .collect();
        (paths, stats)
    }

    #[test]
    fn test_pre_order() {
        let share = MemoryShare::new()
            .with_file("/a/x")
            .with_file("/a/y/z")
            .with_file("/b");
        let transport = MemoryTransport::new(share);

        let (paths, stats) = crawl(&transport, "/");
        assert_eq!(paths, vec!["/a", "/a/x", "/a/y", "/a/y/z", "/b"]);
        assert_eq!(stats.dirs_listed.load(Ordering::Relaxed), 3);
        assert_eq!(stats.entries.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_failed_directory_is_skipped() {
        let share = MemoryShare::new()
            .with_file("/a/b/hidden")
            .with_file("/a/c/visible")
            .fail("/a/b", NfsError::PermissionDenied { path: "/a/b".into() });
        let transport = MemoryTransport::new(share);

        let (paths, stats) = crawl(&transport, "/");
        assert_eq!(paths, vec!["/a", "/a/b", "/a/c", "/a/c/visible"]);
        assert_eq!(stats.dir_errors.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unlistable_start() {
        let transport = MemoryTransport::new(MemoryShare::new());
        let (paths, stats) = crawl(&transport, "/nope");

        assert!(paths.is_empty());
        assert_eq!(stats.dir_errors.load(Ordering::Relaxed), 1);
        assert_eq!(transport.open_sessions(), 0);
    }

    #[test]
    fn test_listing_is_lazy() {
        let share = MemoryShare::new().with_file("/a/x").with_file("/b/y");
        let transport = MemoryTransport::new(share);
        let session = transport.open().unwrap();
        let mut crawler = SequentialCrawler::new(session, "/", Arc::default());

        assert_eq!(transport.requests(), 0);
        assert_eq!(crawler.next().unwrap().path, "/a");
        // Only the root has been listed; /a waits for the next pull
        assert_eq!(transport.requests(), 1);
        assert_eq!(crawler.next().unwrap().path, "/a/x");
        assert_eq!(transport.requests(), 2);
    }

    #[test]
    fn test_session_released_at_exhaustion() {
        let transport = MemoryTransport::new(MemoryShare::new().with_file("/f"));
        let session = transport.open().unwrap();
        let mut crawler = SequentialCrawler::new(session, "/", Arc::default());

        assert!(crawler.next().is_some());
        assert!(crawler.next().is_none());
        assert_eq!(transport.open_sessions(), 0);
        assert!(crawler.next().is_none());
    }
}
