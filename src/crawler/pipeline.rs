//! Request pipelining over one session
//!
//! [`RequestPipeline`] keeps up to `depth` asynchronous listings in
//! flight on one session and turns readiness into completed listings:
//!
//! ```text
//!   fill() ──list_async()──▶ slots[0..depth]
//!                                 │
//!   turn() ──poll(fd, events)──▶ service(revents) ──▶ is_ready()?
//!                                 │                       │
//!                           zero events              Listed / Failed
//!                                 ▼
//!                          CrawlError::Stalled
//! ```
//!
//! The engine is shared by [`PipelinedCrawler`] and by every pool worker.

use crate::crawler::queue::WorkSet;
use crate::crawler::stats::CrawlStats;
use crate::error::{CrawlError, CrawlResult, NfsError};
use crate::nfs::poller::{Interest, Poller, SysPoller};
use crate::nfs::transport::{Events, PendingListing, Session};
use crate::nfs::types::Entry;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Terminal outcome of one listing request
#[derive(Debug)]
pub enum Completion {
    /// The listing finished
    Listed { path: String, entries: Vec<Entry> },

    /// The listing failed; the directory's subtree is skipped
    Failed { path: String, error: NfsError },
}

/// Up to `depth` outstanding listings on one session
pub struct RequestPipeline<S: Session, P: Poller = SysPoller> {
    // Declared before `session` so listings are released first
    slots: Vec<Option<S::Listing>>,
    session: S,
    poller: P,
    timeout: Duration,
}

impl<S: Session> RequestPipeline<S> {
    pub fn new(session: S, depth: usize, timeout: Duration) -> Self {
        Self::with_poller(session, depth, timeout, SysPoller::new())
    }
}

impl<S: Session, P: Poller> RequestPipeline<S, P> {
    pub fn with_poller(session: S, depth: usize, timeout: Duration, poller: P) -> Self {
        let mut slots = Vec::with_capacity(depth.max(1));
        slots.resize_with(depth.max(1), || None);

        Self {
            slots,
            session,
            poller,
            timeout,
        }
    }

    /// Number of requests in flight
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().any(|s| s.is_none())
    }

    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Issue requests into every free slot, pulling paths from `next`
    ///
    /// Never blocks. Requests that cannot even be issued come back as
    /// failed completions.
    pub fn fill(&mut self, mut next: impl FnMut() -> Option<String>) -> Vec<Completion> {
        let mut failed = Vec::new();

        for slot in self.slots.iter_mut().filter(|s| s.is_none()) {
            while let Some(path) = next() {
                match self.session.list_async(&path) {
                    Ok(listing) => {
                        trace!(path = %path, "Listing requested");
                        *slot = Some(listing);
                        break;
                    }
                    Err(error) => failed.push(Completion::Failed { path, error }),
                }
            }
        }

        failed
    }

    /// Wait for readiness once and collect every finished listing
    ///
    /// Fails with [`CrawlError::Stalled`] if the session shows no
    /// readiness within the timeout, and with [`CrawlError::Connection`]
    /// if servicing the session fails.
    pub fn turn(&mut self) -> CrawlResult<Vec<Completion>> {
        if self.is_idle() {
            return Ok(Vec::new());
        }

        let interest = Interest::new(self.session.descriptor(), self.session.desired_events());
        let ready = self.poller.poll(&[interest], self.timeout)?;

        if ready.is_empty() {
            return Err(CrawlError::Stalled {
                timeout: self.timeout,
                in_flight: self.in_flight(),
            });
        }

        let mut revents = Events::NONE;
        for readiness in &ready {
            if readiness.index != 0 {
                return Err(CrawlError::MalformedReadiness {
                    reason: format!(
                        "readiness for index {} with one registered descriptor",
                        readiness.index
                    ),
                });
            }
            revents |= readiness.revents;
        }

        self.session
            .service(revents)
            .map_err(|source| CrawlError::Connection { source })?;

        let mut done = Vec::new();
        for slot in &mut self.slots {
            let Some(listing) = slot.take() else {
                continue;
            };

            match listing.is_ready() {
                Ok(true) => {
                    let path = listing.path().to_string();
                    done.push(Completion::Listed {
                        path,
                        entries: listing.drain(),
                    });
                }
                Ok(false) => *slot = Some(listing),
                Err(error) => done.push(Completion::Failed {
                    path: listing.path().to_string(),
                    error,
                }),
            }
        }

        Ok(done)
    }

    /// Release every in-flight listing and return their paths
    pub fn abandon(&mut self) -> Vec<String> {
        self.slots
            .iter_mut()
            .filter_map(Option::take)
            .map(|listing| listing.path().to_string())
            .collect()
    }
}

/// Crawler that overlaps listings on a single session
///
/// A stalled session or a servicing failure ends the traversal with one
/// error item.
pub struct PipelinedCrawler<S: Session, P: Poller = SysPoller> {
    /// Released at exhaustion or on a fatal error
    engine: Option<RequestPipeline<S, P>>,
    work: WorkSet,
    buffer: VecDeque<Entry>,
    stats: Arc<CrawlStats>,
}

impl<S: Session> PipelinedCrawler<S> {
    pub fn new(
        session: S,
        start: &str,
        depth: usize,
        timeout: Duration,
        stats: Arc<CrawlStats>,
    ) -> Self {
        Self::with_engine(RequestPipeline::new(session, depth, timeout), start, stats)
    }
}

impl<S: Session, P: Poller> PipelinedCrawler<S, P> {
    pub fn with_engine(engine: RequestPipeline<S, P>, start: &str, stats: Arc<CrawlStats>) -> Self {
        Self {
            engine: Some(engine),
            work: WorkSet::seeded(start),
            buffer: VecDeque::new(),
            stats,
        }
    }

    fn absorb(&mut self, completions: Vec<Completion>) {
        for completion in completions {
            match completion {
                Completion::Listed { path, entries } => {
                    trace!(path = %path, entries = entries.len(), "Directory listed");
                    self.stats.record_listing();

                    for entry in entries {
                        if entry.is_dir() && !self.work.push(entry.path.clone()) {
                            debug!(path = %entry.path, "Directory already seen, skipping");
                            continue;
                        }
                        self.buffer.push_back(entry);
                    }
                }
                Completion::Failed { path, error } => {
                    warn!(path = %path, error = %error, "Directory listing failed, skipping subtree");
                    self.stats.record_dir_error();
                }
            }
        }
    }

    fn release(&mut self) {
        if let Some(engine) = self.engine.take() {
            debug!(in_flight = engine.in_flight(), "Pipeline released");
        }
    }
}

impl<S: Session, P: Poller> Iterator for PipelinedCrawler<S, P> {
    type Item = CrawlResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                self.stats.record_entry();
                return Some(Ok(entry));
            }

            let engine = self.engine.as_mut()?;
            let work = &mut self.work;
            let failed = engine.fill(|| work.pop());
            let turn = if engine.is_idle() {
                None
            } else {
                Some(engine.turn())
            };

            self.absorb(failed);

            match turn {
                None => {
                    if self.buffer.is_empty() && self.work.is_empty() {
                        self.release();
                        return None;
                    }
                }
                Some(Ok(done)) => self.absorb(done),
                Some(Err(e)) => {
                    error!(error = %e, "Pipelined crawl aborted");
                    self.release();
                    return Some(Err(e));
                }
            }
        }
    }
}
