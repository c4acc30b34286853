//! Recursive directory crawling
//!
//! [`crawl`] picks a strategy from [`CrawlOptions`] and returns an
//! [`EntryStream`], a lazy iterator over every entry reachable from the
//! start directory:
//!
//! | concurrency | pipeline depth | strategy                          |
//! |-------------|----------------|-----------------------------------|
//! | 1           | 1              | [`SequentialCrawler`]             |
//! | 1           | > 1            | [`PipelinedCrawler`]              |
//! | > 1         | any            | [`PooledCrawler`], N connections  |
//!
//! Per-directory listing failures never reach the caller: they are
//! logged, counted in [`CrawlStats`], and the subtree is skipped. A fatal
//! error is yielded once, after which the stream is exhausted. Every
//! session is closed by the time the stream ends or is dropped.
//!
//! # Example
//!
//! ```
//! use nfs_crawler::crawler::{crawl, CrawlOptions};
//! use nfs_crawler::nfs::{MemoryShare, MemoryTransport};
//!
//! let share = MemoryShare::new().with_file("/a/x").with_file("/f");
//! let transport = MemoryTransport::new(share);
//!
//! let options = CrawlOptions::default().concurrency(4);
//! let mut paths: Vec<String> = crawl(&transport, "/", &options)
//!     .unwrap()
//!     .map(|entry| entry.unwrap().path)
//!     .collect();
//! paths.sort();
//!
//! assert_eq!(paths, vec!["/a", "/a/x", "/f"]);
//! ```

pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod sequential;
pub mod stats;

pub use pipeline::{Completion, PipelinedCrawler, RequestPipeline};
pub use pool::{PoolSettings, PooledCrawler};
pub use queue::{Dispatcher, WorkSet};
pub use sequential::SequentialCrawler;
pub use stats::{CrawlProgress, CrawlStats};

use crate::error::{ConfigError, CrawlResult};
use crate::nfs::transport::{Session, Transport};
use crate::nfs::types::Entry;
use std::iter::FusedIterator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Maximum number of pool connections
pub const MAX_CONCURRENCY: usize = 256;

/// Maximum outstanding listings per connection
pub const MAX_PIPELINE_DEPTH: usize = 1024;

/// Default readiness poll bound
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default result queue capacity per pool connection
pub const DEFAULT_RESULT_QUEUE_FACTOR: usize = 3;

/// Traversal knobs
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Number of connections (1 = single connection)
    pub concurrency: usize,

    /// Outstanding listings per connection
    pub pipeline_depth: usize,

    /// How long a connection may show no readiness before it counts as
    /// stalled
    pub poll_timeout: Duration,

    /// Pool result queue capacity, per connection
    pub result_queue_factor: usize,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            pipeline_depth: 1,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            result_queue_factor: DEFAULT_RESULT_QUEUE_FACTOR,
        }
    }
}

impl CrawlOptions {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = depth;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn result_queue_factor(mut self, factor: usize) -> Self {
        self.result_queue_factor = factor;
        self
    }

    /// Check every knob is in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidConcurrency {
                count: self.concurrency,
                max: MAX_CONCURRENCY,
            });
        }

        if self.pipeline_depth == 0 || self.pipeline_depth > MAX_PIPELINE_DEPTH {
            return Err(ConfigError::InvalidPipelineDepth {
                depth: self.pipeline_depth,
                max: MAX_PIPELINE_DEPTH,
            });
        }

        if self.poll_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                millis: self.poll_timeout.as_millis(),
            });
        }

        if self.result_queue_factor == 0 {
            return Err(ConfigError::InvalidQueueFactor {
                factor: self.result_queue_factor,
            });
        }

        Ok(())
    }

    /// Strategy these options select
    pub fn strategy(&self) -> Strategy {
        match (self.concurrency, self.pipeline_depth) {
            (0 | 1, 0 | 1) => Strategy::Sequential,
            (0 | 1, depth) => Strategy::Pipelined { depth },
            (connections, depth) => Strategy::Pooled {
                connections,
                depth: depth.max(1),
            },
        }
    }
}

/// How a crawl is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One connection, one blocking request at a time
    Sequential,

    /// One connection, `depth` requests in flight
    Pipelined { depth: usize },

    /// `connections` worker threads, each with `depth` requests in flight
    Pooled { connections: usize, depth: usize },
}

impl Strategy {
    /// Number of sessions the strategy needs
    pub fn connections(&self) -> usize {
        match self {
            Strategy::Sequential | Strategy::Pipelined { .. } => 1,
            Strategy::Pooled { connections, .. } => *connections,
        }
    }
}

enum Inner<S: Session> {
    Sequential(SequentialCrawler<S>),
    Pipelined(PipelinedCrawler<S>),
    Pooled(PooledCrawler),
}

/// Lazy sequence of crawled entries
///
/// Yields `Ok(entry)` for every reachable entry exactly once, or a single
/// `Err` if the traversal fails, then ends.
pub struct EntryStream<S: Session> {
    inner: Inner<S>,
    strategy: Strategy,
    stats: Arc<CrawlStats>,
    started: Instant,
    done: bool,
}

impl<S: Session> EntryStream<S> {
    /// Strategy in use
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Live counters for this crawl
    pub fn stats(&self) -> Arc<CrawlStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot of progress so far
    pub fn progress(&self) -> CrawlProgress {
        self.stats.snapshot(self.started.elapsed())
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        let progress = self.progress();
        info!(
            dirs = progress.dirs_listed,
            entries = progress.entries,
            dir_errors = progress.dir_errors,
            retired = progress.retired_connections,
            elapsed_ms = progress.elapsed.as_millis() as u64,
            "Crawl finished"
        );
    }
}

impl<S: Session> Iterator for EntryStream<S> {
    type Item = CrawlResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = match &mut self.inner {
            Inner::Sequential(crawler) => crawler.next().map(Ok),
            Inner::Pipelined(crawler) => crawler.next(),
            Inner::Pooled(crawler) => crawler.next(),
        };

        match item {
            Some(Ok(entry)) => Some(Ok(entry)),
            Some(Err(e)) => {
                self.finish();
                Some(Err(e))
            }
            None => {
                self.finish();
                None
            }
        }
    }
}

impl<S: Session> FusedIterator for EntryStream<S> {}

/// Crawl everything below `start_path`
///
/// All sessions are opened before this returns; if one fails to open the
/// others are closed again and the error is returned.
pub fn crawl<T>(
    transport: &T,
    start_path: &str,
    options: &CrawlOptions,
) -> CrawlResult<EntryStream<T::Session>>
where
    T: Transport,
    T::Session: 'static,
{
    options.validate()?;

    if !start_path.starts_with('/') {
        return Err(ConfigError::InvalidStartPath {
            path: start_path.to_string(),
        }
        .into());
    }

    let strategy = options.strategy();
    let stats = Arc::new(CrawlStats::default());

    info!(
        endpoint = %transport.endpoint(),
        start = %start_path,
        ?strategy,
        "Starting crawl"
    );

    let first = transport.open()?;

    let inner = match strategy {
        Strategy::Sequential => Inner::Sequential(SequentialCrawler::new(
            first,
            start_path,
            Arc::clone(&stats),
        )),
        Strategy::Pipelined { depth } => Inner::Pipelined(PipelinedCrawler::new(
            first,
            start_path,
            depth,
            options.poll_timeout,
            Arc::clone(&stats),
        )),
        Strategy::Pooled { connections, depth } => {
            let mut sessions = Vec::with_capacity(connections);
            sessions.push(first);
            for _ in 1..connections {
                sessions.push(transport.open()?);
            }

            let settings = PoolSettings {
                depth,
                poll_timeout: options.poll_timeout,
                result_queue_factor: options.result_queue_factor,
            };
            Inner::Pooled(PooledCrawler::spawn(
                sessions,
                start_path,
                settings,
                Arc::clone(&stats),
            )?)
        }
    };

    Ok(EntryStream {
        inner,
        strategy,
        stats,
        started: Instant::now(),
        done: false,
    })
}

/// Crawl an `nfs://` URL over libnfs
///
/// The whole URL path is mounted and `start_path` is taken relative to
/// it. `concurrency` above 1 opens that many connections.
#[cfg(feature = "libnfs")]
pub fn crawl_url(
    url: &str,
    start_path: &str,
    concurrency: usize,
) -> CrawlResult<EntryStream<crate::nfs::NfsSession>> {
    use crate::config::{normalize_path, NfsUrl};

    let url = NfsUrl::parse(url)?.mount_full_path();
    let start = normalize_path(&format!("{}/{}", url.walk_start_path(), start_path));
    let transport = crate::nfs::NfsTransport::new(url);
    let options = CrawlOptions::default().concurrency(concurrency.max(1));
    crawl(&transport, &start, &options)
}
