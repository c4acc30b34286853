//! Multi-connection worker pool
//!
//! Every connection gets its own thread running a [`RequestPipeline`].
//! The driver (the thread pulling entries) owns the seen set, dispatches
//! directories round-robin and merges worker reports:
//!
//! ```text
//!                  ┌──────────────────────────┐
//!                  │      PooledCrawler       │
//!                  │  seen set + dispatcher   │
//!                  └──┬──────────┬─────────┬──┘
//!          unbounded  │          │         │   (one inbound queue each)
//!               ┌─────▼───┐ ┌────▼────┐ ┌──▼──────┐
//!               │crawler-0│ │crawler-1│ │crawler-N│
//!               │ session │ │ session │ │ session │
//!               └─────┬───┘ └────┬────┘ └──┬──────┘
//!                     └──────────┼─────────┘
//!                     bounded    ▼  reports (factor × N)
//! ```
//!
//! A stall or servicing failure only retires the affected worker; the
//! directories queued for it are redispatched to the others.

use crate::crawler::pipeline::{Completion, RequestPipeline};
use crate::crawler::queue::Dispatcher;
use crate::crawler::stats::CrawlStats;
use crate::error::{CrawlError, CrawlResult, NfsError, WorkerError};
use crate::nfs::transport::Session;
use crate::nfs::types::Entry;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Message from a worker to the driver
#[derive(Debug)]
enum Report {
    /// A directory was listed
    Listed {
        worker: usize,
        path: String,
        entries: Vec<Entry>,
    },

    /// A directory could not be listed
    Failed {
        worker: usize,
        path: String,
        error: NfsError,
    },

    /// The worker lost its connection and exited
    Retired { worker: usize, reason: CrawlError },

    /// The worker hit an error that ends the traversal
    Fatal { worker: usize, error: CrawlError },
}

impl Report {
    fn from_completion(worker: usize, completion: Completion) -> Self {
        match completion {
            Completion::Listed { path, entries } => Report::Listed {
                worker,
                path,
                entries,
            },
            Completion::Failed { path, error } => Report::Failed {
                worker,
                path,
                error,
            },
        }
    }
}

/// Pool sizing and timing
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// Outstanding listings per connection
    pub depth: usize,

    /// Readiness poll bound per worker
    pub poll_timeout: Duration,

    /// Result queue capacity per connection
    pub result_queue_factor: usize,
}

/// Reports a worker panic to the driver
struct PanicGuard {
    id: usize,
    reports: Sender<Report>,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            let error = WorkerError::Panicked {
                id: self.id,
                message: "worker thread panicked".into(),
            };
            let _ = self.reports.send(Report::Fatal {
                worker: self.id,
                error: error.into(),
            });
        }
    }
}

/// Crawler fanning listings out over several sessions
pub struct PooledCrawler {
    dispatcher: Dispatcher,
    reports: Option<Receiver<Report>>,
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,

    /// Directories already scheduled
    seen: HashSet<String>,

    /// Dispatched directories without a terminal report yet
    outstanding: usize,

    buffer: VecDeque<Entry>,

    /// Fatal error yielded once the buffer is drained
    failure: Option<CrawlError>,

    stats: Arc<CrawlStats>,
    finished: bool,
}

impl PooledCrawler {
    /// Start one worker per session and dispatch the start directory
    pub fn spawn<S>(
        sessions: Vec<S>,
        start: &str,
        settings: PoolSettings,
        stats: Arc<CrawlStats>,
    ) -> CrawlResult<Self>
    where
        S: Session + 'static,
    {
        let connections = sessions.len();
        let (dispatcher, inbound) = Dispatcher::new(connections);
        let (reports_tx, reports_rx) =
            bounded(settings.result_queue_factor.max(1) * connections.max(1));

        let mut crawler = Self {
            dispatcher,
            reports: Some(reports_rx),
            handles: Vec::with_capacity(connections),
            stop: Arc::new(AtomicBool::new(false)),
            seen: HashSet::new(),
            outstanding: 0,
            buffer: VecDeque::new(),
            failure: None,
            stats,
            finished: false,
        };

        for (id, (session, inbound)) in sessions.into_iter().zip(inbound).enumerate() {
            let reports = reports_tx.clone();
            let stop = Arc::clone(&crawler.stop);

            let handle = thread::Builder::new()
                .name(format!("crawler-{}", id))
                .spawn(move || worker_loop(id, session, inbound, reports, stop, settings))
                .map_err(|e| WorkerError::SpawnFailed {
                    id,
                    reason: e.to_string(),
                })?;

            crawler.handles.push(handle);
        }
        drop(reports_tx);

        debug!(connections, depth = settings.depth, "Worker pool started");

        crawler.seen.insert(start.to_string());
        crawler.dispatch(start.to_string())?;

        Ok(crawler)
    }

    fn dispatch(&mut self, path: String) -> CrawlResult<()> {
        match self.dispatcher.dispatch(path) {
            Ok(worker) => {
                self.outstanding += 1;
                trace!(worker, outstanding = self.outstanding, "Directory dispatched");
                Ok(())
            }
            Err(_) => Err(CrawlError::AllConnectionsStalled {
                connections: self.dispatcher.workers(),
                outstanding: self.outstanding + 1,
            }),
        }
    }

    fn handle(&mut self, report: Report) -> CrawlResult<()> {
        match report {
            Report::Listed {
                worker,
                path,
                entries,
            } => {
                self.outstanding -= 1;
                trace!(worker, path = %path, entries = entries.len(), "Directory listed");
                self.stats.record_listing();

                // Every entry is buffered even if dispatch fails midway
                let mut failure = None;
                for entry in entries {
                    if entry.is_dir() {
                        if !self.seen.insert(entry.path.clone()) {
                            debug!(path = %entry.path, "Directory already seen, skipping");
                            continue;
                        }
                        if failure.is_none() {
                            failure = self.dispatch(entry.path.clone()).err();
                        }
                    }
                    self.buffer.push_back(entry);
                }

                if let Some(e) = failure {
                    return Err(e);
                }
            }
            Report::Failed {
                worker,
                path,
                error,
            } => {
                self.outstanding -= 1;
                warn!(worker, path = %path, error = %error, "Directory listing failed, skipping subtree");
                self.stats.record_dir_error();
            }
            Report::Retired { worker, reason } => {
                self.stats.record_retired();
                let orphans = self.dispatcher.retire(worker);
                warn!(
                    worker,
                    error = %reason,
                    redispatched = orphans.len(),
                    live = self.dispatcher.live(),
                    "Connection retired"
                );

                for path in orphans {
                    self.outstanding -= 1;
                    self.dispatch(path)?;
                }

                if self.dispatcher.live() == 0 && self.outstanding > 0 {
                    return Err(CrawlError::AllConnectionsStalled {
                        connections: self.dispatcher.workers(),
                        outstanding: self.outstanding,
                    });
                }
            }
            Report::Fatal { worker, error } => {
                error!(worker, error = %error, "Worker failed");
                return Err(error);
            }
        }

        Ok(())
    }

    /// Stop the pool; `error` is yielded after the buffered entries
    fn abort(&mut self, error: CrawlError) {
        error!(error = %error, "Pooled crawl aborted");
        self.shutdown();
        self.failure = Some(error);
    }

    /// Stop every worker and wait for it to exit
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.finished = true;
        self.stop.store(true, Ordering::SeqCst);
        self.dispatcher.close();

        // Unblocks workers waiting on a full result queue
        drop(self.reports.take());

        if self.handles.is_empty() {
            return;
        }

        let workers = self.handles.len();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread panicked during shutdown");
            }
        }
        let queue = self.dispatcher.stats();
        debug!(
            workers,
            dispatched = queue.dispatched(),
            reclaimed = queue.reclaimed(),
            "Worker pool stopped"
        );
    }
}

impl Iterator for PooledCrawler {
    type Item = CrawlResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                self.stats.record_entry();
                return Some(Ok(entry));
            }

            if let Some(error) = self.failure.take() {
                return Some(Err(error));
            }

            if self.finished {
                return None;
            }

            if self.outstanding == 0 {
                self.shutdown();
                return None;
            }

            let received = self.reports.as_ref().map(|rx| rx.recv());
            let report = match received {
                Some(Ok(report)) => report,
                _ => {
                    let error = WorkerError::ResultChannelClosed {
                        outstanding: self.outstanding,
                    };
                    self.abort(error.into());
                    continue;
                }
            };

            if let Err(e) = self.handle(report) {
                self.abort(e);
            }
        }
    }
}

impl Drop for PooledCrawler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Per-connection request loop
fn worker_loop<S: Session>(
    id: usize,
    session: S,
    inbound: Receiver<String>,
    reports: Sender<Report>,
    stop: Arc<AtomicBool>,
    settings: PoolSettings,
) {
    let _guard = PanicGuard {
        id,
        reports: reports.clone(),
    };
    let mut engine = RequestPipeline::new(session, settings.depth, settings.poll_timeout);

    debug!(worker = id, "Worker starting");

    'run: while !stop.load(Ordering::Relaxed) {
        let mut first = None;
        if engine.is_idle() {
            match inbound.recv() {
                Ok(path) => first = Some(path),
                Err(_) => break,
            }
        }

        let failed = engine.fill(|| first.take().or_else(|| inbound.try_recv().ok()));
        for completion in failed {
            if reports.send(Report::from_completion(id, completion)).is_err() {
                break 'run;
            }
        }

        if engine.is_idle() {
            continue;
        }

        match engine.turn() {
            Ok(done) => {
                for completion in done {
                    if reports.send(Report::from_completion(id, completion)).is_err() {
                        break 'run;
                    }
                }
            }
            Err(e) if e.is_connection_local() => {
                warn!(worker = id, error = %e, "Connection lost, retiring worker");

                for path in engine.abandon() {
                    let error = e.for_in_flight_path(&path);
                    if reports
                        .send(Report::Failed {
                            worker: id,
                            path,
                            error,
                        })
                        .is_err()
                    {
                        break 'run;
                    }
                }

                let _ = reports.send(Report::Retired {
                    worker: id,
                    reason: e,
                });
                break;
            }
            Err(e) => {
                let _ = reports.send(Report::Fatal {
                    worker: id,
                    error: e,
                });
                break;
            }
        }
    }

    debug!(worker = id, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NfsResult;
    use crate::nfs::memory::{MemoryListing, MemoryShare, MemoryTransport};
    use crate::nfs::transport::{Events, Transport};
    use crate::nfs::types::EntryType;
    use std::os::unix::io::RawFd;
    use std::sync::atomic::AtomicUsize;

    fn settings() -> PoolSettings {
        PoolSettings {
            depth: 1,
            poll_timeout: Duration::from_millis(100),
            result_queue_factor: 3,
        }
    }

    fn open(transport: &MemoryTransport, n: usize) -> Vec<<MemoryTransport as Transport>::Session> {
        (0..n).map(|_| transport.open().unwrap()).collect()
    }

    #[test]
    fn test_pool_lists_everything() {
        let transport = MemoryTransport::new(MemoryShare::synthetic(3, 3, 2));
        let stats = Arc::new(CrawlStats::default());
        let crawler =
            PooledCrawler::spawn(open(&transport, 3), "/", settings(), Arc::clone(&stats)).unwrap();

        let mut paths: Vec<String> = crawler.map(|r| r.unwrap().path).collect();
        let expected = transport.share().entries().count();

        assert_eq!(paths.len(), expected);
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), expected);
        assert_eq!(transport.open_sessions(), 0);
        // root + 3 + 9 + 27 directories listed
        assert_eq!(stats.snapshot(Duration::ZERO).dirs_listed, 40);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let transport = MemoryTransport::new(MemoryShare::synthetic(2, 2, 1));
        let mut crawler =
            PooledCrawler::spawn(open(&transport, 2), "/", settings(), Arc::default()).unwrap();

        crawler.shutdown();
        crawler.shutdown();
        assert!(crawler.next().is_none());
        assert_eq!(transport.open_sessions(), 0);
    }

    #[test]
    fn test_every_connection_stalled() {
        let transport = MemoryTransport::new(MemoryShare::synthetic(2, 2, 1)).stall_all();
        let mut crawler =
            PooledCrawler::spawn(open(&transport, 2), "/", settings(), Arc::default()).unwrap();

        let results: Vec<_> = crawler.by_ref().collect();
        // The root times out on worker 0, which retires; nothing is left
        // outstanding, so the stream simply ends empty.
        assert!(results.is_empty());
        drop(crawler);
        assert_eq!(transport.open_sessions(), 0);
    }

    /// Session whose asynchronous listings panic
    struct PanickingSession {
        dropped: Arc<AtomicUsize>,
    }

    impl Session for PanickingSession {
        type Listing = MemoryListing;

        fn list(&mut self, _: &str) -> NfsResult<Vec<Entry>> {
            Ok(Vec::new())
        }

        fn list_async(&mut self, path: &str) -> NfsResult<MemoryListing> {
            panic!("listing {} blew up", path);
        }

        fn descriptor(&self) -> RawFd {
            -1
        }

        fn desired_events(&self) -> Events {
            Events::NONE
        }

        fn service(&mut self, _: Events) -> NfsResult<()> {
            Ok(())
        }
    }

    impl Drop for PanickingSession {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_worker_panic_is_fatal() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let session = PanickingSession {
            dropped: Arc::clone(&dropped),
        };
        let mut crawler =
            PooledCrawler::spawn(vec![session], "/", settings(), Arc::default()).unwrap();

        assert!(matches!(
            crawler.next(),
            Some(Err(CrawlError::Worker(WorkerError::Panicked { id: 0, .. })))
        ));
        assert!(crawler.next().is_none());
        assert!(crawler.next().is_none());
        // Unwinding released the session
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listed_entries_survive_dispatch_failure() {
        let transport = MemoryTransport::new(MemoryShare::new()).stall_all();
        let mut crawler =
            PooledCrawler::spawn(open(&transport, 1), "/", settings(), Arc::default()).unwrap();

        // No worker can take the subdirectories
        crawler.dispatcher.close();
        let report = Report::Listed {
            worker: 0,
            path: "/".into(),
            entries: vec![
                Entry::new("/a", EntryType::Directory),
                Entry::new("/f", EntryType::File),
                Entry::new("/b", EntryType::Directory),
            ],
        };
        let error = crawler.handle(report).unwrap_err();
        crawler.abort(error);

        let mut items: Vec<_> = crawler.by_ref().collect();
        assert!(matches!(
            items.pop(),
            Some(Err(CrawlError::AllConnectionsStalled { .. }))
        ));
        let paths: Vec<String> = items.into_iter().map(|r| r.unwrap().path).collect();
        assert_eq!(paths, vec!["/a", "/f", "/b"]);
        assert!(crawler.next().is_none());
        assert_eq!(transport.open_sessions(), 0);
    }
}
