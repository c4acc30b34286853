//! Work tracking for a crawl
//!
//! [`WorkSet`] holds the directories still to be listed by a
//! single-connection strategy and remembers every directory ever
//! scheduled, so a directory is never listed twice.
//!
//! [`Dispatcher`] hands directories to pool workers. Each worker owns a
//! private unbounded inbound queue; directories are assigned round-robin
//! over the workers that are still live. When a worker retires, the
//! directories still waiting in its queue are reclaimed for redispatch.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pending directories plus the set of directories already scheduled
#[derive(Debug, Default)]
pub struct WorkSet {
    /// Directories awaiting a listing request (popped LIFO)
    pending: Vec<String>,

    /// Every directory ever pushed, including the start path
    seen: HashSet<String>,
}

impl WorkSet {
    /// Create a work set seeded with the start directory
    pub fn seeded(start: &str) -> Self {
        let mut work = Self::default();
        work.push(start.to_string());
        work
    }

    /// Schedule a directory
    ///
    /// Returns `false` if the directory was scheduled before.
    pub fn push(&mut self, path: String) -> bool {
        if !self.seen.insert(path.clone()) {
            return false;
        }
        self.pending.push(path);
        true
    }

    /// Take the most recently scheduled directory
    pub fn pop(&mut self) -> Option<String> {
        self.pending.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Number of distinct directories ever scheduled
    pub fn scheduled(&self) -> usize {
        self.seen.len()
    }
}

/// Statistics for the dispatcher
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Directories dispatched to a worker
    pub dispatched: AtomicU64,

    /// Directories reclaimed from retired workers
    pub reclaimed: AtomicU64,
}

impl QueueStats {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }
}

/// Round-robin directory assignment over per-worker inbound queues
pub struct Dispatcher {
    /// Inbound senders; `None` once a worker retires
    senders: Vec<Option<Sender<String>>>,

    /// Receiver clones used to reclaim queued work from retired workers
    reclaim: Vec<Receiver<String>>,

    /// Next worker to try
    next: usize,

    stats: Arc<QueueStats>,
}

impl Dispatcher {
    /// Create queues for `workers` workers
    ///
    /// Returns the dispatcher and one inbound receiver per worker, in
    /// worker order.
    pub fn new(workers: usize) -> (Self, Vec<Receiver<String>>) {
        let mut senders = Vec::with_capacity(workers);
        let mut reclaim = Vec::with_capacity(workers);
        let mut inbound = Vec::with_capacity(workers);

        for _ in 0..workers {
            let (tx, rx) = unbounded();
            senders.push(Some(tx));
            reclaim.push(rx.clone());
            inbound.push(rx);
        }

        let dispatcher = Self {
            senders,
            reclaim,
            next: 0,
            stats: Arc::new(QueueStats::default()),
        };

        (dispatcher, inbound)
    }

    /// Assign a directory to the next live worker
    ///
    /// Returns the chosen worker, or gives the path back if no worker
    /// can take it.
    pub fn dispatch(&mut self, path: String) -> Result<usize, String> {
        let workers = self.senders.len();

        for _ in 0..workers {
            let id = self.next;
            self.next = (self.next + 1) % workers;

            let Some(sender) = &self.senders[id] else {
                continue;
            };

            // The reclaim receiver keeps every queue connected
            sender.send(path).map_err(|e| e.into_inner())?;
            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            return Ok(id);
        }

        Err(path)
    }

    /// Stop routing to `worker` and reclaim the directories still queued
    /// for it
    pub fn retire(&mut self, worker: usize) -> Vec<String> {
        let Some(slot) = self.senders.get_mut(worker) else {
            return Vec::new();
        };
        *slot = None;

        let orphans: Vec<String> = self.reclaim[worker].try_iter().collect();
        self.stats
            .reclaimed
            .fetch_add(orphans.len() as u64, Ordering::Relaxed);
        orphans
    }

    /// Number of workers still accepting work
    pub fn live(&self) -> usize {
        self.senders.iter().filter(|s| s.is_some()).count()
    }

    /// Total number of workers
    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Close every inbound queue so idle workers wake up and exit
    pub fn close(&mut self) {
        for slot in &mut self.senders {
            *slot = None;
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_set_dedups() {
        let mut work = WorkSet::seeded("/");
        assert_eq!(work.len(), 1);

        assert!(work.push("/a".into()));
        assert!(!work.push("/a".into()));
        assert!(!work.push("/".into()));

        assert_eq!(work.pop().as_deref(), Some("/a"));
        assert_eq!(work.pop().as_deref(), Some("/"));
        assert!(work.is_empty());

        // Popped directories stay seen
        assert!(!work.push("/a".into()));
        assert_eq!(work.scheduled(), 2);
    }

    #[test]
    fn test_dispatch_round_robin() {
        let (mut dispatcher, inbound) = Dispatcher::new(3);

        assert_eq!(dispatcher.dispatch("/a".into()), Ok(0));
        assert_eq!(dispatcher.dispatch("/b".into()), Ok(1));
        assert_eq!(dispatcher.dispatch("/c".into()), Ok(2));
        assert_eq!(dispatcher.dispatch("/d".into()), Ok(0));

        assert_eq!(inbound[0].try_iter().collect::<Vec<_>>(), vec!["/a", "/d"]);
        assert_eq!(inbound[1].recv().unwrap(), "/b");
        assert_eq!(dispatcher.stats().dispatched(), 4);
    }

    #[test]
    fn test_retire_reclaims_and_skips() {
        let (mut dispatcher, _inbound) = Dispatcher::new(2);

        dispatcher.dispatch("/a".into()).unwrap();
        dispatcher.dispatch("/b".into()).unwrap();
        dispatcher.dispatch("/c".into()).unwrap();

        let orphans = dispatcher.retire(0);
        assert_eq!(orphans, vec!["/a", "/c"]);
        assert_eq!(dispatcher.live(), 1);

        assert_eq!(dispatcher.dispatch("/d".into()), Ok(1));
        assert_eq!(dispatcher.dispatch("/e".into()), Ok(1));

        dispatcher.retire(1);
        assert_eq!(dispatcher.dispatch("/f".into()), Err("/f".to_string()));
        assert_eq!(dispatcher.stats().reclaimed(), 5);
    }

    #[test]
    fn test_close_disconnects_workers() {
        let (mut dispatcher, inbound) = Dispatcher::new(2);
        dispatcher.close();

        assert_eq!(dispatcher.live(), 0);
        assert!(inbound[0].recv().is_err());
    }
}
